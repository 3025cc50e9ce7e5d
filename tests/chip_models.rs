use std::sync::Arc;

use chipdispatch::freq::{period_for_note, NOTE_C4};
use chipdispatch::{
    create_chip, ChipConfig, ChipDispatch, ChipModel, Command, CommandKind, Instrument, Sample,
    SongResources, HANDLED, PORTA_DONE,
};

fn resources() -> Arc<SongResources> {
    SongResources {
        instruments: vec![Instrument::sample("kick", 0)],
        samples: vec![Sample::pcm8("kick", (0..2000).map(|i| ((i % 64) * 3 - 96) as i8).collect())],
    }
    .shared()
}

fn chip(model: ChipModel) -> Box<dyn ChipDispatch> {
    create_chip(&ChipConfig::new(model), resources()).unwrap()
}

/// Sample-based models need the sample instrument to make any sound
fn plays_samples(model: ChipModel) -> bool {
    matches!(model, ChipModel::K007232 | ChipModel::Ymz280b)
}

fn key_on(chip: &mut dyn ChipDispatch, ch: usize, note: i32) {
    if plays_samples(chip.model()) {
        chip.dispatch(Command::new(ch, CommandKind::Instrument, 0));
    }
    chip.dispatch(Command::new(ch, CommandKind::NoteOn, note));
}

fn drain(chip: &mut dyn ChipDispatch) -> usize {
    std::iter::from_fn(|| chip.base_mut().port.pop()).count()
}

/// Register holding channel 0's volume and the bits that carry it
fn volume_register(model: ChipModel) -> (usize, u8) {
    match model {
        ChipModel::Ay8910 => (0x08, 0x0f),
        ChipModel::Saa1099 => (0x00, 0xff),
        ChipModel::K007232 => (0x0c, 0x0f),
        ChipModel::Ymz280b => (0x02, 0xff),
        ChipModel::SoundUnit => (0x02, 0xff),
        ChipModel::PcSpeaker => (0x00, 0xff),
    }
}

fn freq_range(model: ChipModel) -> (i32, i32) {
    match model {
        ChipModel::Ay8910 => (0, 4095),
        ChipModel::Saa1099 => (256, 65535),
        ChipModel::K007232 => (0, 4095),
        ChipModel::Ymz280b => (0, 511),
        ChipModel::SoundUnit => (0, 65535),
        ChipModel::PcSpeaker => (0, 65535),
    }
}

#[test]
fn psg_note_on_programs_period_and_mixer() {
    let mut chip = chip(ChipModel::Ay8910);
    chip.dispatch(Command::new(0, CommandKind::NoteOn, NOTE_C4));
    chip.tick(true);
    let pool = chip.register_pool();
    let period = ((pool[1] as i32) << 8) | pool[0] as i32;
    assert_eq!(period, period_for_note(1_789_772.0, 16.0, NOTE_C4));
    assert_eq!(period, 428);
    assert_eq!(pool[7] & 1, 0, "tone enable bit for channel 0 is active low");
    assert_eq!(pool[7] & 0x08, 0x08, "noise stays disabled");
}

#[test]
fn sample_addresses_follow_memory_layout() {
    let resources = SongResources {
        instruments: vec![Instrument::sample("a", 0), Instrument::sample("b", 1)],
        samples: vec![
            Sample::pcm8("a", vec![1; 1000]).with_loop(10, 500),
            Sample::pcm16("b", vec![1; 100]),
        ],
    }
    .shared();
    let mut chip = create_chip(&ChipConfig::new(ChipModel::Ymz280b), resources).unwrap();
    chip.dispatch(Command::new(0, CommandKind::Instrument, 0));
    chip.dispatch(Command::new(0, CommandKind::NoteOn, NOTE_C4));
    chip.dispatch(Command::new(1, CommandKind::Instrument, 1));
    chip.dispatch(Command::new(1, CommandKind::NoteOn, NOTE_C4));
    chip.tick(true);

    let pool = chip.register_pool();
    let address = |voice: usize, slot: usize| {
        let reg = voice * 4 + slot;
        ((pool[0x20 + reg] as usize) << 16) | ((pool[0x40 + reg] as usize) << 8) | pool[0x60 + reg] as usize
    };
    assert_eq!(
        [address(0, 0), address(0, 1), address(0, 2), address(0, 3)],
        [0, 10, 500, 1000]
    );
    // 16-bit data starts after the first sample and spans two bytes per frame
    assert_eq!(address(1, 0), 1000);
    assert_eq!(address(1, 3), 1200);

    let memory = chip.sample_memory().unwrap();
    assert_eq!(memory.entry(1).map(|e| e.offset), Some(1000));
}

#[test]
fn mute_forces_silent_volume_encoding() {
    for model in ChipModel::ALL {
        let mut chip = chip(model);
        key_on(chip.as_mut(), 0, NOTE_C4);
        chip.tick(true);
        let (reg, mask) = volume_register(model);
        assert_ne!(chip.register_pool()[reg] & mask, 0, "{} audible before mute", model.name());
        let before = chip.channel_status(0).unwrap().out_vol;

        chip.mute_channel(0, true);
        chip.tick(true);
        assert_eq!(chip.register_pool()[reg] & mask, 0, "{} silent after mute", model.name());
        let status = chip.channel_status(0).unwrap();
        assert!(status.muted);
        assert_eq!(status.out_vol, before, "{} keeps its logical volume", model.name());

        chip.mute_channel(0, false);
        chip.tick(true);
        assert_ne!(chip.register_pool()[reg] & mask, 0, "{} audible after unmute", model.name());
    }
}

#[test]
fn second_tick_writes_nothing() {
    for model in ChipModel::ALL {
        let mut chip = chip(model);
        key_on(chip.as_mut(), 0, NOTE_C4);
        chip.tick(true);
        assert!(drain(chip.as_mut()) > 0, "{} wrote the note", model.name());
        chip.tick(true);
        assert_eq!(chip.pending_writes(), 0, "{} idle tick", model.name());
    }
}

#[test]
fn frequency_stays_in_range() {
    let bends = [-100_000, -5_000, 0, 5_000, 100_000];
    let notes = [0, NOTE_C4, 119];
    for model in ChipModel::ALL {
        let (min, max) = freq_range(model);
        let mut chip = chip(model);
        key_on(chip.as_mut(), 0, NOTE_C4);
        for &note in &notes {
            for &bend in &bends {
                chip.dispatch(Command::new(0, CommandKind::Legato, note));
                chip.dispatch(Command::new(0, CommandKind::Pitch, bend));
                chip.tick(true);
                let freq = chip.channel_status(0).unwrap().freq;
                assert!(
                    (min..=max).contains(&freq),
                    "{}: note {note} bend {bend} gave {freq}",
                    model.name()
                );
            }
        }
    }
}

#[test]
fn note_off_reaches_silence() {
    for model in ChipModel::ALL {
        let mut chip = chip(model);
        let channels = chip.output_channels();
        key_on(chip.as_mut(), 0, NOTE_C4);
        chip.tick(true);
        let mut out = vec![0i16; 4096 * channels];
        chip.acquire(&mut out, 4096);
        assert!(out.iter().any(|&s| s != 0), "{} made sound", model.name());

        chip.dispatch(Command::new(0, CommandKind::NoteOff, 0));
        chip.tick(true);
        let mut tail = vec![0i16; 8192 * channels];
        chip.acquire(&mut tail, 8192);
        let end = &tail[tail.len() - 256 * channels..];
        // the PSG's DC blocker settles toward zero rather than jumping there
        assert!(
            end.iter().all(|&s| s.abs() <= 64),
            "{} still sounding: {:?}",
            model.name(),
            &end[..8]
        );
        assert!(!chip.channel_status(0).unwrap().active);
    }
}

#[test]
fn portamento_reports_done_once() {
    for model in [ChipModel::Ay8910, ChipModel::PcSpeaker, ChipModel::Ymz280b] {
        let mut chip = chip(model);
        key_on(chip.as_mut(), 0, NOTE_C4);
        chip.tick(true);
        let step = if model == ChipModel::Ymz280b { 64 } else { 4 };
        let mut results = Vec::new();
        for _ in 0..100_000 {
            let ret = chip.dispatch(Command::with_value2(0, CommandKind::NotePorta, step, NOTE_C4 + 7));
            chip.tick(true);
            results.push(ret);
            if ret == PORTA_DONE {
                break;
            }
        }
        assert_eq!(results.iter().filter(|&&r| r == PORTA_DONE).count(), 1, "{}", model.name());
        assert_eq!(results.last(), Some(&PORTA_DONE));
        assert!(results[..results.len() - 1].iter().all(|&r| r == HANDLED));

        // the slide lands exactly on the target note
        let slid = chip.channel_status(0).unwrap().freq;
        let mut reference = self::chip(model);
        key_on(reference.as_mut(), 0, NOTE_C4 + 7);
        reference.tick(true);
        assert_eq!(slid, reference.channel_status(0).unwrap().freq, "{}", model.name());
    }
}

#[test]
fn invalid_channel_is_ignored() {
    for model in ChipModel::ALL {
        let mut chip = chip(model);
        let ch = chip.channel_count();
        assert_eq!(chip.dispatch(Command::new(ch, CommandKind::NoteOn, NOTE_C4)), HANDLED);
        chip.tick(true);
        assert!(chip.channel_status(ch).is_none());
    }
}

#[test]
fn reset_returns_to_power_on() {
    for model in ChipModel::ALL {
        let mut chip = chip(model);
        key_on(chip.as_mut(), 0, NOTE_C4);
        chip.tick(true);
        chip.reset();
        let status = chip.channel_status(0).unwrap();
        assert!(!status.active, "{}", model.name());
        let mut out = vec![0i16; 2048 * chip.output_channels()];
        chip.acquire(&mut out, 2048);
        chip.tick(true);
        assert!(
            chip.osc_buffer(0).unwrap().latest(256).iter().all(|&s| s.abs() <= 64),
            "{}",
            model.name()
        );
    }
}

#[test]
fn register_dump_mirrors_queue() {
    for model in ChipModel::ALL {
        let mut chip = chip(model);
        drain(chip.as_mut());
        chip.set_dump_writes(true);
        key_on(chip.as_mut(), 0, NOTE_C4);
        chip.tick(true);
        let queued: Vec<_> = std::iter::from_fn(|| chip.base_mut().port.pop()).collect();
        assert_eq!(chip.take_register_dump(), queued, "{}", model.name());
        assert!(chip.take_register_dump().is_empty());
    }
}

#[test]
fn skip_writes_suppresses_everything() {
    for model in ChipModel::ALL {
        let mut chip = chip(model);
        drain(chip.as_mut());
        chip.set_skip_writes(true);
        key_on(chip.as_mut(), 0, NOTE_C4);
        chip.tick(true);
        assert_eq!(chip.pending_writes(), 0, "{}", model.name());
    }
}

#[test]
fn stereo_models_interleave() {
    for model in ChipModel::ALL {
        let chip = chip(model);
        let expected = matches!(model, ChipModel::Saa1099 | ChipModel::Ymz280b | ChipModel::SoundUnit);
        assert_eq!(chip.is_stereo(), expected, "{}", model.name());
    }
}
