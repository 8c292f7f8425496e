#[derive(Debug, Clone, Copy)]
pub struct Tag {
    pub key: &'static str,
    pub metric: &'static str,
    pub help: &'static str,
}

pub const FORCE_KN: Tag = Tag {
    key: "force_kn",
    metric: "press_force_kilonewtons",
    help: "Last corrected load-cell force in kN",
};

pub const TARGET_KN: Tag = Tag {
    key: "target_kn",
    metric: "press_target_force_kilonewtons",
    help: "Regulation target force in kN",
};

pub const DEADBAND_KN: Tag = Tag {
    key: "deadband_kn",
    metric: "press_deadband_kilonewtons",
    help: "Regulation deadband in kN",
};

pub const ACTIVE: Tag = Tag {
    key: "active",
    metric: "press_active",
    help: "Press active input (1=active)",
};

pub const RECORDED_SAMPLES: Tag = Tag {
    key: "recorded_samples",
    metric: "press_recorded_samples",
    help: "Samples held by the session recorder",
};

pub const REGULATION_STATE: Tag = Tag {
    key: "regulation",
    metric: "press_regulation_state",
    help: "Regulation state (0=idle,1=regulating,2=paused)",
};

/// Columns of an exported recording, in order.
pub const EXPORT_COLUMNS: [&str; 3] = ["timestamp", "elapsed_seconds", "force_kn"];

/// Human-readable wall-clock format for recorded samples.
pub const TIMESTAMP_FORMAT: &str = "%a %b %e %H:%M:%S %Y";
