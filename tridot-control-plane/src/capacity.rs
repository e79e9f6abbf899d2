use tridot_core::NodeHealthRequest;

/// Inputs to the capacity heuristic.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HealthSample {
    pub active_peers: u32,
    pub cpu_percent: f64,
    pub throughput_mbps: f64,
    /// Ratio in `[0, 1]`.
    pub packet_loss: f64,
}

impl From<&NodeHealthRequest> for HealthSample {
    fn from(request: &NodeHealthRequest) -> Self {
        Self {
            active_peers: request.active_peers,
            cpu_percent: request.cpu_percent,
            throughput_mbps: request.throughput_mbps,
            packet_loss: request.packet_loss,
        }
    }
}

/// Reduces a health sample to a 0..=100 placement score.
///
/// Starts at 100 and subtracts `min(60, peers * 4)`, `round(cpu / 2)`,
/// `round(mbps / 100)` and `round(loss * 50)`, then clamps. Non-increasing in
/// every input.
pub fn compute_capacity_score(sample: &HealthSample) -> u8 {
    let peer_penalty = i64::from(sample.active_peers).saturating_mul(4).min(60);

    let score = 100i64
        .saturating_sub(peer_penalty)
        .saturating_sub(rounded(sample.cpu_percent / 2.0))
        .saturating_sub(rounded(sample.throughput_mbps / 100.0))
        .saturating_sub(rounded(sample.packet_loss * 50.0));

    score.clamp(0, 100) as u8
}

/// Half away from zero; NaN counts as 0 and infinities saturate.
fn rounded(value: f64) -> i64 {
    value.round() as i64
}
