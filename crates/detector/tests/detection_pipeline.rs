//! End-to-end detection over synthetic samples: channels feed fusion and
//! produce one request per highlight.

use reelcast_common::config::{AudioSustainConfig, DetectionConfig, MotionSpikeConfig};
use reelcast_detector::{
    AudioChannel, AudioSample, AudioSustainChannel, EventFusion, FrameChannel, FrameSample,
    GrayImage, MotionSpikeChannel, TriggerChannel,
};
use reelcast_job_model::{ChannelId, Orientation};

#[test]
fn test_roar_and_cut_fuse_into_one_event() {
    let config = DetectionConfig::default();
    let mut audio = AudioSustainChannel::new(AudioSustainConfig::default(), config.audio_buffer_secs);
    let mut motion = MotionSpikeChannel::new(MotionSpikeConfig::default(), config.fps);
    let mut fusion = EventFusion::new("final", Orientation::Standard, config.cooldown_secs)
        .with_roll(ChannelId::AudioSustain, audio.roll())
        .with_roll(ChannelId::MotionSpike, motion.roll());

    let mut requests = Vec::new();

    // 20 s of stream: a roar from 10.0 s to 12.0 s and a scene cut at 10.5 s.
    for tick in 0..200u64 {
        let t = tick as f64 * 0.1;
        let energy = if (10.0..12.0).contains(&t) { 0.9 } else { 0.1 };
        let signal = audio.on_audio(&AudioSample {
            pts: t,
            duration_secs: 0.1,
            energy,
        });

        let mut batch = vec![signal];
        for sub in 0..4u64 {
            let index = tick * 4 + sub;
            let pts = index as f64 / 40.0;
            let luma = if pts >= 10.5 { 220 } else { 30 };
            let frame = FrameSample::new(pts, index, GrayImage::filled(96, 54, luma));
            if let Some(signal) = motion.on_frame(&frame) {
                batch.push(signal);
            }
        }
        requests.extend(fusion.ingest_batch(batch));
    }

    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    // The roar completes its sustain at 10.2 s; the cut at 10.5 s is debounced.
    assert!(request.event_timestamp >= 10.0 && request.event_timestamp <= 10.5);
    assert_eq!(fusion.stats().emitted, 1);
    assert!(fusion.stats().suppressed >= 1);
}

#[test]
fn test_separate_highlights_beyond_cooldown() {
    let mut audio = AudioSustainChannel::new(AudioSustainConfig::default(), 0.1);
    let mut fusion = EventFusion::new("final", Orientation::Vertical, 8.0)
        .with_roll(ChannelId::AudioSustain, audio.roll());

    let mut anchors = Vec::new();
    for tick in 0..400u64 {
        let t = tick as f64 * 0.1;
        let loud = (5.0..6.0).contains(&t) || (25.0..26.0).contains(&t);
        let signal = audio.on_audio(&AudioSample {
            pts: t,
            duration_secs: 0.1,
            energy: if loud { 0.8 } else { 0.0 },
        });
        if let Some(request) = fusion.ingest(&signal) {
            assert_eq!(request.orientation, Orientation::Vertical);
            anchors.push(request.event_timestamp);
        }
    }

    assert_eq!(anchors.len(), 2);
    assert!(anchors[1] - anchors[0] >= 8.0);
}
