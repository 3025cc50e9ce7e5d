use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use chipdispatch::render::{write_dump_csv, write_wav, RenderJob};
use chipdispatch::{ChipModel, SpeakerType};

const USAGE: &str = "\
Usage:
  chipdispatch [options] <job.json>

Options:
  -o, --out <file.wav>   Output WAV (default: job name with .wav)
  --csv <file.csv>       Export the register dump as CSV (enables the dump)
  --ticks <n>            Override the render length in ticks
  --list-models          Print the chip models and their clock presets
  -h, --help             Show this help

Job file (JSON):
  {
    \"chip\": {\"model\": \"Ay8910\", \"clock_sel\": 0},
    \"tick_rate\": 60,
    \"pokes\": \"07=38\",
    \"events\": [{\"tick\": 0, \"channel\": 0, \"kind\": \"NoteOn\", \"value\": 48}]
  }
";

#[derive(Debug, Default)]
struct Args {
    job: Option<PathBuf>,
    out: Option<PathBuf>,
    csv: Option<PathBuf>,
    ticks: Option<u64>,
    list_models: bool,
    help: bool,
}

fn parse_args() -> Result<Args> {
    let mut parsed = Args::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => parsed.help = true,
            "--list-models" => parsed.list_models = true,
            "-o" | "--out" => {
                let value = args.next().context("--out requires a file name")?;
                parsed.out = Some(value.into());
            }
            "--csv" => {
                let value = args.next().context("--csv requires a file name")?;
                parsed.csv = Some(value.into());
            }
            "--ticks" => {
                let value = args.next().context("--ticks requires a number")?;
                parsed.ticks = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid tick count '{value}'"))?,
                );
            }
            _ if arg.starts_with('-') => bail!("unknown flag: {arg}"),
            _ => {
                if parsed.job.replace(arg.into()).is_some() {
                    bail!("only one job file can be rendered at a time");
                }
            }
        }
    }
    Ok(parsed)
}

fn list_models() {
    for model in ChipModel::ALL {
        let clocks: Vec<String> = model
            .clock_presets()
            .iter()
            .enumerate()
            .map(|(i, hz)| format!("{i}: {hz} Hz"))
            .collect();
        println!("{:<12} {}", model.name(), clocks.join(", "));
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args()?;
    if args.list_models {
        list_models();
        return Ok(());
    }
    let Some(job_path) = args.job.filter(|_| !args.help) else {
        eprint!("{USAGE}");
        return Ok(());
    };

    let text = fs::read_to_string(&job_path)
        .with_context(|| format!("failed to read job file {}", job_path.display()))?;
    let mut job = RenderJob::from_json(&text)
        .with_context(|| format!("invalid job file {}", job_path.display()))?;
    if args.ticks.is_some() {
        job.ticks = args.ticks;
    }
    if args.csv.is_some() {
        job.chip.dump_writes = true;
    }
    if job.chip.speaker_type == SpeakerType::Real && job.chip.model == ChipModel::PcSpeaker {
        log::info!("real speaker output selected; the WAV will be silent");
    }

    log::info!(
        "rendering {} ticks on {} at {} Hz",
        job.length_ticks(),
        job.chip.model.name(),
        job.chip.clock()
    );
    let rendered = job.render().context("render failed")?;

    let out = args
        .out
        .unwrap_or_else(|| job_path.with_extension("wav"));
    write_wav(&out, &rendered).with_context(|| format!("failed to write {}", out.display()))?;
    println!(
        "{}: {:.2} s, {} Hz, {} channel(s)",
        out.display(),
        rendered.duration_secs(),
        rendered.rate,
        rendered.channels
    );

    if let Some(csv) = args.csv {
        write_dump_csv(&csv, &rendered.dump)
            .with_context(|| format!("failed to write {}", csv.display()))?;
        println!("{}: {} register writes", csv.display(), rendered.dump.len());
    }
    Ok(())
}
