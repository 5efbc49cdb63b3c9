//! Static register catalogue
//!
//! The descriptor table consumed by the cache: every telemetry token the
//! monitor emits plus the command-reachable configuration registers.
//! Native units follow the device documentation (mV, mA, mAh, 0.1%
//! state-of-charge, minutes); factors scale them to display units.

use super::{Descriptor, RegisterCache, Value};

/// Register addresses for the battery configuration group.
pub const REG_CAPACITY: u16 = 0x1000;
pub const REG_CHARGED_VOLTAGE: u16 = 0x1001;
pub const REG_TAIL_CURRENT: u16 = 0x1002;
pub const REG_CHARGED_DETECT_TIME: u16 = 0x1003;
pub const REG_CHARGE_EFFICIENCY: u16 = 0x1004;
pub const REG_PEUKERT: u16 = 0x1005;
pub const REG_CURRENT_THRESHOLD: u16 = 0x1006;
pub const REG_TTG_DELTA_T: u16 = 0x1007;
pub const REG_RELAY_LOW_SOC: u16 = 0x1008;
pub const REG_RELAY_LOW_SOC_CLEAR: u16 = 0x1009;

/// Live value registers.
pub const REG_VOLTAGE: u16 = 0xED8D;
pub const REG_POWER: u16 = 0xED8E;
pub const REG_CURRENT: u16 = 0xED8F;
pub const REG_CONSUMED_AH: u16 = 0xEEFF;
pub const REG_SOC: u16 = 0x0FFF;
pub const REG_TTG: u16 = 0x0FFE;
pub const REG_RELAY_STATE: u16 = 0x034E;
pub const REG_RELAY_MODE: u16 = 0x034F;
pub const REG_MID_VOLTAGE: u16 = 0x0382;
pub const REG_MID_DEVIATION: u16 = 0x0383;

/// Base address of the H1..H18 history block.
const REG_HISTORY_BASE: u16 = 0x0300;

fn format_ttg(value: &Value) -> String {
    match value {
        // the monitor reports -1 while no discharge trend is available
        Value::Int(-1) => "--".to_string(),
        Value::Int(n) => format!("{} min", n),
        Value::Text(s) => s.clone(),
    }
}

const HISTORY: [(&str, &str); 18] = [
    ("historyDeepestDischarge", "deepest discharge"),
    ("historyLastDischarge", "last discharge"),
    ("historyAverageDischarge", "average discharge"),
    ("historyChargeCycles", "charge cycles"),
    ("historyFullDischarges", "full discharges"),
    ("historyTotalAhDrawn", "cumulative Ah drawn"),
    ("historyMinVoltage", "minimum battery voltage"),
    ("historyMaxVoltage", "maximum battery voltage"),
    ("historySecondsSinceFullCharge", "seconds since last full charge"),
    ("historySynchronisations", "automatic synchronisations"),
    ("historyLowVoltageAlarms", "low voltage alarms"),
    ("historyHighVoltageAlarms", "high voltage alarms"),
    ("historyLowAuxVoltageAlarms", "low auxiliary voltage alarms"),
    ("historyHighAuxVoltageAlarms", "high auxiliary voltage alarms"),
    ("historyMinAuxVoltage", "minimum auxiliary voltage"),
    ("historyMaxAuxVoltage", "maximum auxiliary voltage"),
    ("historyDischargedEnergy", "total discharged energy"),
    ("historyChargedEnergy", "total charged energy"),
];

/// Build a cache pre-populated with the full descriptor table.
pub fn default_cache() -> RegisterCache {
    let mut cache = RegisterCache::new();

    // live telemetry values
    cache.insert(
        Descriptor::numeric(
            "voltage",
            Some("V"),
            Some(REG_VOLTAGE),
            0.001,
            2,
            0.01,
            "V",
            "main battery voltage",
        )
        .with_width(2, true),
    );
    cache.insert(
        Descriptor::numeric(
            "midVoltage",
            Some("VM"),
            Some(REG_MID_VOLTAGE),
            0.001,
            2,
            0.01,
            "V",
            "mid-point battery voltage",
        )
        .with_width(2, false),
    );
    cache.insert(
        Descriptor::numeric(
            "midDeviation",
            Some("DM"),
            Some(REG_MID_DEVIATION),
            0.1,
            1,
            0.1,
            "%",
            "mid-point deviation",
        )
        .with_width(2, true),
    );
    cache.insert(
        Descriptor::numeric(
            "current",
            Some("I"),
            Some(REG_CURRENT),
            0.001,
            2,
            0.01,
            "A",
            "battery current",
        )
        .with_width(2, true),
    );
    cache.insert(
        Descriptor::numeric(
            "power",
            Some("P"),
            Some(REG_POWER),
            1.0,
            0,
            1.0,
            "W",
            "instantaneous power",
        )
        .with_width(2, true),
    );
    cache.insert(
        Descriptor::numeric(
            "consumedAh",
            Some("CE"),
            Some(REG_CONSUMED_AH),
            0.001,
            2,
            0.01,
            "Ah",
            "consumed charge",
        )
        .with_width(4, true),
    );
    cache.insert(
        Descriptor::numeric(
            "stateOfCharge",
            Some("SOC"),
            Some(REG_SOC),
            0.1,
            1,
            0.1,
            "%",
            "state of charge",
        )
        .with_width(2, false),
    );
    cache.insert(
        Descriptor::numeric(
            "timeToGo",
            Some("TTG"),
            Some(REG_TTG),
            1.0,
            0,
            1.0,
            "min",
            "time to discharge floor",
        )
        .with_width(2, true)
        .with_formatter(format_ttg),
    );
    cache.insert(Descriptor::text(
        "alarm",
        Some("Alarm"),
        None,
        "alarm condition active",
    ));
    cache.insert(
        Descriptor::text(
            "relayState",
            Some("Relay"),
            Some(REG_RELAY_STATE),
            "relay state",
        )
        .with_width(1, false),
    );
    cache.insert(Descriptor::numeric(
        "alarmReason",
        Some("AR"),
        None,
        1.0,
        0,
        0.0,
        "",
        "alarm reason bitmask",
    ));
    cache.insert(Descriptor::text("model", Some("BMV"), None, "monitor model"));
    cache.insert(Descriptor::text(
        "firmwareVersion",
        Some("FW"),
        None,
        "telemetry firmware version",
    ));
    cache.insert(Descriptor::text(
        "productId",
        Some("PID"),
        None,
        "product identification",
    ));
    // fed by ping and version responses only
    cache.insert(Descriptor::text(
        "version",
        None,
        None,
        "application version reported over the hex protocol",
    ));

    // history block H1..H18
    for (i, (name, descr)) in HISTORY.iter().enumerate() {
        let key = format!("H{}", i + 1);
        let address = REG_HISTORY_BASE + i as u16;
        let d = match *name {
            "historyDeepestDischarge" | "historyLastDischarge" | "historyAverageDischarge"
            | "historyTotalAhDrawn" => Descriptor::numeric(
                name,
                Some(&key),
                Some(address),
                0.001,
                2,
                0.01,
                "Ah",
                descr,
            )
            .with_width(4, true),
            "historyMinVoltage" | "historyMaxVoltage" | "historyMinAuxVoltage"
            | "historyMaxAuxVoltage" => Descriptor::numeric(
                name,
                Some(&key),
                Some(address),
                0.001,
                2,
                0.01,
                "V",
                descr,
            )
            .with_width(2, true),
            "historyDischargedEnergy" | "historyChargedEnergy" => Descriptor::numeric(
                name,
                Some(&key),
                Some(address),
                0.01,
                2,
                0.01,
                "kWh",
                descr,
            )
            .with_width(4, false),
            "historySecondsSinceFullCharge" => Descriptor::numeric(
                name,
                Some(&key),
                Some(address),
                1.0,
                0,
                1.0,
                "s",
                descr,
            )
            .with_width(4, true),
            _ => Descriptor::numeric(name, Some(&key), Some(address), 1.0, 0, 1.0, "", descr)
                .with_width(4, false),
        };
        cache.insert(d);
    }

    // battery configuration registers, command protocol only
    cache.insert(Descriptor::numeric(
        "capacity",
        None,
        Some(REG_CAPACITY),
        1.0,
        0,
        0.0,
        "Ah",
        "battery capacity",
    ));
    cache.insert(Descriptor::numeric(
        "chargedVoltage",
        None,
        Some(REG_CHARGED_VOLTAGE),
        0.1,
        1,
        0.0,
        "V",
        "charged voltage threshold",
    ));
    cache.insert(Descriptor::numeric(
        "tailCurrent",
        None,
        Some(REG_TAIL_CURRENT),
        0.1,
        1,
        0.0,
        "%",
        "tail current threshold",
    ));
    cache.insert(Descriptor::numeric(
        "chargedDetectTime",
        None,
        Some(REG_CHARGED_DETECT_TIME),
        1.0,
        0,
        0.0,
        "min",
        "charged detection time",
    ));
    cache.insert(Descriptor::numeric(
        "chargeEfficiency",
        None,
        Some(REG_CHARGE_EFFICIENCY),
        1.0,
        0,
        0.0,
        "%",
        "charge efficiency factor",
    ));
    cache.insert(Descriptor::numeric(
        "peukertCoefficient",
        None,
        Some(REG_PEUKERT),
        0.01,
        2,
        0.0,
        "",
        "Peukert coefficient",
    ));
    cache.insert(Descriptor::numeric(
        "currentThreshold",
        None,
        Some(REG_CURRENT_THRESHOLD),
        0.01,
        2,
        0.0,
        "A",
        "zero current threshold",
    ));
    cache.insert(Descriptor::numeric(
        "ttgDeltaT",
        None,
        Some(REG_TTG_DELTA_T),
        1.0,
        0,
        0.0,
        "min",
        "time-to-go averaging period",
    ));
    cache.insert(Descriptor::numeric(
        "relayLowSoc",
        None,
        Some(REG_RELAY_LOW_SOC),
        0.1,
        1,
        0.0,
        "%",
        "relay low state-of-charge set level",
    ));
    cache.insert(Descriptor::numeric(
        "relayLowSocClear",
        None,
        Some(REG_RELAY_LOW_SOC_CLEAR),
        0.1,
        1,
        0.0,
        "%",
        "relay low state-of-charge clear level",
    ));
    cache.insert(
        Descriptor::numeric(
            "relayMode",
            None,
            Some(REG_RELAY_MODE),
            1.0,
            0,
            0.0,
            "",
            "relay mode",
        )
        .with_width(1, false),
    );

    cache
}
