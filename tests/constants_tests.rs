// SPDX-License-Identifier: MPL-2.0

//! Integration tests for constants module

use luma_relay::constants::{BitratePreset, format_bitrate, limits, pipeline};

#[test]
fn test_bitrate_preset_values() {
    // Test that all presets exist (Low, Medium, High)
    assert_eq!(BitratePreset::ALL.len(), 3);
}

#[test]
fn test_bitrate_preset_ordering() {
    // Test that presets are ordered from lowest to highest quality
    let mut prev_bitrate = 0u32;
    for preset in BitratePreset::ALL {
        let bitrate = preset.bitrate_kbps(1920);
        assert!(
            bitrate >= prev_bitrate,
            "Presets should be ordered from lowest to highest"
        );
        prev_bitrate = bitrate;
    }
}

#[test]
fn test_bitrate_scales_with_resolution() {
    // Higher resolution should have higher bitrate at same preset
    let hd_bitrate = BitratePreset::Medium.bitrate_kbps(1280);
    let fhd_bitrate = BitratePreset::Medium.bitrate_kbps(1920);
    let uhd_bitrate = BitratePreset::Medium.bitrate_kbps(3840);

    assert!(hd_bitrate < fhd_bitrate);
    assert!(fhd_bitrate < uhd_bitrate);
}

#[test]
fn test_bitrate_preset_display_names() {
    // Test that all presets have non-empty display names
    for preset in BitratePreset::ALL {
        let name = preset.display_name();
        assert!(
            !name.is_empty(),
            "Preset {:?} has empty display name",
            preset
        );
    }
}

#[test]
fn test_format_bitrate_for_presets() {
    assert_eq!(format_bitrate(BitratePreset::Low.bitrate_kbps(640)), "1.5 Mbps");
    assert_eq!(format_bitrate(BitratePreset::High.bitrate_kbps(3840)), "80 Mbps");
}

#[test]
fn test_pipeline_element_names_are_distinct() {
    let names = [
        pipeline::CAPTURE_QUEUE_NAME,
        pipeline::APPSINK_NAME,
        pipeline::APPSRC_NAME,
        pipeline::OUTPUT_QUEUE_NAME,
        pipeline::ENCODER_NAME,
    ];
    for (i, a) in names.iter().enumerate() {
        for b in &names[i + 1..] {
            assert_ne!(a, b);
        }
    }
}

#[test]
fn test_worker_limits() {
    assert!(limits::MIN_WORKERS >= 1);
    assert!(limits::MIN_WORKERS <= limits::MAX_WORKERS);
}
