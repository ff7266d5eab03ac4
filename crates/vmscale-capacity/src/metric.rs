//! Accelerator type → region quota metric name.

/// Known accelerator types and the quota metric each one counts against.
const KNOWN_METRICS: &[(&str, &str)] = &[
    ("nvidia-tesla-t4", "NVIDIA_T4_GPUS"),
    ("nvidia-tesla-v100", "NVIDIA_V100_GPUS"),
    ("nvidia-tesla-p100", "NVIDIA_P100_GPUS"),
    ("nvidia-tesla-p4", "NVIDIA_P4_GPUS"),
    ("nvidia-tesla-k80", "NVIDIA_K80_GPUS"),
    ("nvidia-tesla-a100", "NVIDIA_A100_GPUS"),
    ("nvidia-a100-80gb", "NVIDIA_A100_80GB_GPUS"),
    ("nvidia-l4", "NVIDIA_L4_GPUS"),
    ("nvidia-h100-80gb", "NVIDIA_H100_GPUS"),
];

/// Quota metric for an accelerator type.
///
/// Unknown types are derived: uppercase, `-` → `_`, drop the
/// `NVIDIA_TESLA_` or `NVIDIA_` prefix, then wrap as `NVIDIA_<rest>_GPUS`.
pub fn quota_metric(resource_class: &str) -> String {
    let class = resource_class.trim().to_ascii_lowercase();
    if let Some((_, metric)) = KNOWN_METRICS.iter().find(|(c, _)| *c == class) {
        return (*metric).to_string();
    }

    let upper = class.to_ascii_uppercase().replace('-', "_");
    let rest = upper
        .strip_prefix("NVIDIA_TESLA_")
        .or_else(|| upper.strip_prefix("NVIDIA_"))
        .unwrap_or(&upper);
    format!("NVIDIA_{rest}_GPUS")
}
