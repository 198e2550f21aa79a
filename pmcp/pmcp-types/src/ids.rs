use rand::distr::Alphanumeric;
use rand::Rng;

fn random_suffix(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

/// New watch-rule id, e.g. `r_k3f9x2ab`.
pub fn new_rule_id() -> String {
    format!("r_{}", random_suffix(8))
}

/// New alert-event id, e.g. `evt_9h2k4m1qw8rz`.
pub fn new_event_id() -> String {
    format!("evt_{}", random_suffix(12))
}
