//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting the default device, or one by id or name substring
//! - choosing a stream config close to the source sample rate

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

/// Output device metadata for selection UIs.
#[derive(Clone, Debug, Serialize)]
pub struct DeviceInfo {
    /// Opaque id accepted by [`pick_device`].
    pub id: String,
    pub name: String,
    pub min_rate: u32,
    pub max_rate: u32,
    pub is_default: bool,
}

/// Pick an output device.
///
/// `selector` matches a device id exactly or a device name by case-insensitive
/// substring. `None` (or a blank selector) returns the host default device.
pub fn pick_device(host: &cpal::Host, selector: Option<&str>) -> Result<cpal::Device> {
    let selector = selector.map(str::trim).filter(|s| !s.is_empty());
    let Some(selector) = selector else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };

    let devices: Vec<cpal::Device> = host
        .output_devices()
        .context("No output devices")?
        .collect();

    if let Some(d) = devices
        .iter()
        .find(|d| d.id().map(|id| id.to_string() == selector).unwrap_or(false))
    {
        return Ok(d.clone());
    }
    devices
        .into_iter()
        .find(|d| {
            d.description()
                .map(|desc| matches_device_name(desc.name(), selector))
                .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("No output device matched: {selector}"))
}

/// Pick the best supported output config for a source at `target_rate`.
///
/// Prefers the exact rate when a range covers it, then the highest rate below it, then
/// the lowest rate above it. Ties go to the better sample format (f32 first).
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();

    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            below: target_rate.map(|t| rate <= t).unwrap_or(true),
            rate,
            channels_ok: range.channels() <= 2,
            format_rank: sample_format_rank(range.sample_format()),
        };
        let replace = best
            .as_ref()
            .map(|(b, _)| candidate.is_better_than(b))
            .unwrap_or(true);
        if replace {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Prefer a fixed buffer size if the device advertises a range.
///
/// Returns `None` when the device only supports its default buffer size.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            const MAX_FRAMES: u32 = 4_096;
            Some(cpal::BufferSize::Fixed((*max).min(MAX_FRAMES).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Device metadata for every output device of `host`.
pub fn list_device_infos(host: &cpal::Host) -> Result<Vec<DeviceInfo>> {
    let default_id = host
        .default_output_device()
        .and_then(|d| d.id().ok())
        .map(|id| id.to_string());
    let devices = host.output_devices().context("No output devices")?;
    let mut out = Vec::new();
    for d in devices {
        let name = match d.description() {
            Ok(desc) => desc.name().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "skipping device without description");
                continue;
            }
        };
        let id = d.id().map(|id| id.to_string()).unwrap_or_else(|_| name.clone());
        let (mut min_rate, mut max_rate) = (u32::MAX, 0u32);
        if let Ok(ranges) = d.supported_output_configs() {
            for r in ranges {
                min_rate = min_rate.min(r.min_sample_rate());
                max_rate = max_rate.max(r.max_sample_rate());
            }
        }
        if max_rate == 0 {
            match d.default_output_config() {
                Ok(cfg) => {
                    min_rate = cfg.sample_rate();
                    max_rate = cfg.sample_rate();
                }
                Err(_) => {
                    tracing::warn!(device = %name, "skipping device without output configs");
                    continue;
                }
            }
        }
        out.push(DeviceInfo {
            is_default: default_id.as_deref() == Some(id.as_str()),
            id,
            name,
            min_rate,
            max_rate,
        });
    }
    Ok(out)
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    below: bool,
    rate: u32,
    channels_ok: bool,
    format_rank: u8,
}

impl Candidate {
    fn is_better_than(&self, other: &Candidate) -> bool {
        if self.channels_ok != other.channels_ok {
            self.channels_ok
        } else if self.below != other.below {
            self.below
        } else if self.rate != other.rate {
            self.rate > other.rate
        } else {
            self.format_rank < other.format_rank
        }
    }
}

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) => target.clamp(min, max.max(min)),
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(below: bool, rate: u32, channels_ok: bool, format_rank: u8) -> Candidate {
        Candidate {
            below,
            rate,
            channels_ok,
            format_rank,
        }
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", " "));
    }

    #[test]
    fn rate_is_clamped_into_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(48_000)), 48_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(22_050)), 44_100);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(192_000)), 96_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, None), 96_000);
    }

    #[test]
    fn exact_rate_beats_higher_rate_above_target() {
        let exact = candidate(true, 44_100, true, 1);
        let above = candidate(false, 48_000, true, 0);
        assert!(exact.is_better_than(&above));
        assert!(!above.is_better_than(&exact));
    }

    #[test]
    fn stereo_capable_config_is_preferred() {
        let stereo = candidate(false, 48_000, true, 2);
        let surround = candidate(true, 44_100, false, 0);
        assert!(stereo.is_better_than(&surround));
    }

    #[test]
    fn format_rank_breaks_ties() {
        let f32_cfg = candidate(true, 48_000, true, 0);
        let i16_cfg = candidate(true, 48_000, true, 2);
        assert!(f32_cfg.is_better_than(&i16_cfg));
    }
}
