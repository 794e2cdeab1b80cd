//! 电压/信号换算
//!
//! 硬件只上报电压（mV）和 CSQ，电量百分比和信号百分比靠查表与
//! 分段线性插值估算。

/// 电压区间与对应的起始电量百分比，按电压从高到低排列
const VOLTAGE_LEVELS: &[(i32, i32)] = &[
    (4170, 100),
    (4140, 100),
    (4126, 99),
    (4112, 98),
    (4102, 97),
    (4086, 96),
    (4076, 95),
    (4064, 94),
    (4060, 93),
    (4050, 92),
    (4040, 91),
    (4034, 90),
    (4026, 89),
    (4024, 88),
    (4020, 87),
    (4018, 86),
    (4016, 85),
    (4012, 84),
    (4008, 83),
    (4002, 82),
    (3996, 81),
    (3993, 80),
    (3990, 79),
    (3984, 78),
    (3982, 77),
    (3976, 76),
    (3970, 75),
    (3962, 74),
    (3958, 73),
    (3952, 72),
    (3944, 71),
    (3936, 70),
    (3932, 69),
    (3926, 68),
    (3918, 67),
    (3910, 66),
    (3906, 65),
    (3898, 64),
    (3892, 63),
    (3884, 62),
    (3876, 61),
    (3868, 60),
    (3862, 59),
    (3858, 58),
    (3852, 57),
    (3856, 56),
    (3842, 55),
    (3838, 54),
    (3830, 53),
    (3822, 52),
    (3818, 51),
    (3816, 50),
    (3814, 49),
    (3810, 48),
    (3800, 47),
    (3796, 46),
    (3792, 45),
    (3786, 44),
    (3780, 43),
    (3772, 42),
    (3766, 41),
    (3756, 40),
    (3748, 39),
    (3742, 38),
    (3732, 37),
    (3722, 36),
    (3710, 35),
    (3700, 34),
    (3690, 33),
    (3680, 32),
    (3674, 31),
    (3662, 30),
    (3650, 29),
    (3638, 28),
    (3630, 27),
    (3618, 26),
    (3614, 25),
    (3604, 24),
    (3596, 23),
    (3590, 22),
    (3582, 21),
    (3576, 20),
    (3564, 19),
    (3554, 18),
    (3544, 17),
    (3534, 16),
    (3524, 15),
    (3514, 14),
    (3508, 13),
    (3496, 12),
    (3490, 11),
    (3484, 10),
    (3478, 9),
    (3472, 8),
    (3464, 7),
    (3456, 6),
    (3442, 5),
    (3420, 4),
    (3380, 3),
    (3326, 2),
    (3260, 1),
    (3200, 0),
];

/// 电压（mV）换算电量百分比，取第一个不高于该电压的档位
pub fn vol_to_percent(vol: i32) -> i32 {
    let mut res = 100;
    for &(voltage, percentage) in VOLTAGE_LEVELS {
        if voltage <= vol {
            return percentage;
        }
        res = percentage;
    }
    res
}

/// CSQ 换算信号百分比，分段线性插值（经验值，非专业换算）
pub fn csq_as_percent(csq: i32) -> i32 {
    if csq >= 30 {
        100
    } else if csq >= 25 {
        85 + (csq - 25) * (100 - 85) / (30 - 25)
    } else if csq >= 20 {
        65 + (csq - 20) * (85 - 65) / (25 - 20)
    } else if csq >= 17 {
        45 + (csq - 17) * (65 - 45) / (20 - 17)
    } else if csq >= 14 {
        25 + (csq - 14) * (45 - 25) / (17 - 14)
    } else if csq >= 10 {
        15 + (csq - 10) * (25 - 10) / (14 - 10)
    } else {
        csq * 15 / 10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vol_to_percent() {
        assert_eq!(vol_to_percent(4170), 100);
        assert_eq!(vol_to_percent(4000), 81);
        assert_eq!(vol_to_percent(3800), 47);
        assert_eq!(vol_to_percent(3600), 23);
        assert_eq!(vol_to_percent(3200), 0);
        // 低于所有档位，取最低档
        assert_eq!(vol_to_percent(3000), 0);
    }

    #[test]
    fn test_vol_to_percent_stays_in_range() {
        for vol in (3000..=4300).step_by(7) {
            let p = vol_to_percent(vol);
            assert!((0..=100).contains(&p), "vol {vol} -> {p}");
        }
    }

    #[test]
    fn test_csq_as_percent() {
        assert_eq!(csq_as_percent(30), 100);
        assert_eq!(csq_as_percent(25), 85);
        assert_eq!(csq_as_percent(20), 65);
        assert_eq!(csq_as_percent(17), 45);
        assert_eq!(csq_as_percent(14), 25);
        assert_eq!(csq_as_percent(10), 15);
        assert_eq!(csq_as_percent(5), 7);
        assert_eq!(csq_as_percent(0), 0);
    }
}
