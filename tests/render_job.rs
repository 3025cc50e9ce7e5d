use approx::assert_relative_eq;

use chipdispatch::render::{write_dump_csv, write_wav, RenderJob};
use chipdispatch::{ChipModel, DispatchError};

const BEEP_JOB: &str = r#"{
    "chip": {"model": "PcSpeaker", "speaker_type": "Unfiltered"},
    "tick_rate": 50,
    "ticks": 50,
    "events": [
        {"tick": 0, "channel": 0, "kind": "NoteOn", "value": 57},
        {"tick": 40, "channel": 0, "kind": "NoteOff"}
    ]
}"#;

/// Rising edges per second over a mono block
fn rising_edge_rate(samples: &[i16], rate: u32) -> f64 {
    let edges = samples
        .windows(2)
        .filter(|w| w[0] <= 0 && w[1] > 0)
        .count();
    edges as f64 * rate as f64 / samples.len() as f64
}

#[test]
fn beeper_plays_a440() {
    let job = RenderJob::from_json(BEEP_JOB).unwrap();
    let out = job.render().unwrap();
    assert_eq!(out.channels, 1);
    assert_eq!(out.rate, 1_193_182 / 4);
    assert_relative_eq!(out.duration_secs(), 1.0, max_relative = 0.001);

    let sounding = &out.samples[..out.samples.len() * 3 / 4];
    assert_relative_eq!(rising_edge_rate(sounding, out.rate), 440.0, max_relative = 0.01);
    // keyed off at tick 40
    let tail = &out.samples[out.samples.len() * 82 / 100..];
    assert!(tail.iter().all(|&s| s == 0));
}

#[test]
fn wav_and_csv_outputs() {
    let mut job = RenderJob::from_json(BEEP_JOB).unwrap();
    job.chip.dump_writes = true;
    let out = job.render().unwrap();
    // note on: period low/high; note off: both cleared
    assert_eq!(out.dump.len(), 4);

    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("beep.wav");
    write_wav(&wav, &out).unwrap();
    let reader = hound::WavReader::open(&wav).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, out.rate);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(reader.len() as usize, out.samples.len());

    let csv = dir.path().join("dump.csv");
    write_dump_csv(&csv, &out.dump).unwrap();
    let mut rows = csv::Reader::from_path(&csv).unwrap();
    let parsed: Vec<(u32, u16)> = rows.deserialize().map(|r| r.unwrap()).collect();
    let expected: Vec<(u32, u16)> = out.dump.iter().map(|w| (w.addr, w.val)).collect();
    assert_eq!(parsed, expected);
}

#[test]
fn stereo_job_with_pokes_and_mutes() {
    let job = RenderJob::from_json(
        r#"{
            "chip": {"model": "Saa1099", "clock_sel": 1},
            "ticks": 10,
            "pokes": "1c=01",
            "muted": [1],
            "events": [
                {"tick": 0, "channel": 0, "kind": "NoteOn", "value": 48},
                {"tick": 0, "channel": 1, "kind": "NoteOn", "value": 55},
                {"tick": 2, "channel": 0, "kind": "Panning", "value": 255, "value2": 0}
            ]
        }"#,
    )
    .unwrap();
    assert_eq!(job.chip.model, ChipModel::Saa1099);
    let out = job.render().unwrap();
    assert_eq!(out.channels, 2);
    assert_eq!(out.samples.len() % 2, 0);
    assert!(out.samples.iter().any(|&s| s != 0));
}

#[test]
fn every_model_renders_default_job() {
    for model in ChipModel::ALL {
        let job = RenderJob::from_json(&format!(
            r#"{{"chip": {{"model": "{model:?}"}}, "ticks": 4,
                "events": [{{"tick": 0, "channel": 0, "kind": "NoteOn", "value": 48}}]}}"#
        ))
        .unwrap();
        let out = job.render().unwrap();
        assert_eq!(out.samples.len(), out.frames() * out.channels as usize);
        assert!(out.frames() > 0, "{}", model.name());
        assert_eq!(out.dropped_writes, 0);
    }
}

#[test]
fn invalid_jobs_fail_cleanly() {
    assert!(matches!(
        RenderJob::from_json("{not json"),
        Err(DispatchError::Json(_))
    ));
    assert!(matches!(
        RenderJob::from_json(r#"{"chip": {"model": "Ay8910", "clock_sel": 9}}"#),
        Err(DispatchError::Config(_))
    ));
    assert!(matches!(
        RenderJob::from_json(r#"{"chip": {"model": "Ay8910", "fifo_capacity": 0}}"#),
        Err(DispatchError::Config(_))
    ));
}
