//! `ftlsim` — replay a byte-granular I/O trace through an FTL write
//! policy over a simulated Open-Channel SSD and emit timing/endurance
//! reports.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use ftlsim_ftl::{driver, engine_specs, find_engine, Workload};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ftlsim", about = "FTL write-policy test harness for Open-Channel SSD geometries")]
struct Args {
    /// Engine to run, by name or numeric id (see --list-engines).
    #[arg(long, default_value = "pagelog")]
    engine: String,

    /// JSON workload file; individual flags below override its fields.
    #[arg(long)]
    workload: Option<PathBuf>,

    /// Input trace file (`count`, then `offset,size,type` per line).
    #[arg(long)]
    trace: Option<PathBuf>,

    #[arg(long)]
    channels: Option<u64>,
    #[arg(long)]
    luns: Option<u64>,
    #[arg(long)]
    blocks: Option<u64>,
    #[arg(long)]
    pages: Option<u64>,
    #[arg(long)]
    planes: Option<u64>,
    #[arg(long)]
    page_size: Option<u64>,

    /// Superblock shape for the superblock engines.
    #[arg(long)]
    sb_pus: Option<u64>,
    #[arg(long)]
    sb_blks: Option<u64>,
    /// Log-block pool size for the sblog engine.
    #[arg(long)]
    log_blocks: Option<u64>,

    /// Directory receiving heatmap_io.csv and iotime_io.csv.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// List the registered engines and exit.
    #[arg(long)]
    list_engines: bool,
}

fn default_workload() -> Workload {
    Workload {
        nchs: 2,
        nluns: 2,
        nblks: 32,
        npgs: 64,
        nplanes: 1,
        page_nbytes: 4096,
        read_factor: 0,
        write_factor: 100,
        sb_pus: 1,
        sb_blks: 1,
        log_blocks: 10,
        trace_path: PathBuf::new(),
    }
}

fn assemble_workload(args: &Args) -> anyhow::Result<Workload> {
    let mut workload: Workload = match &args.workload {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("opening workload file {}", path.display()))?;
            serde_json::from_reader(file)
                .with_context(|| format!("parsing workload file {}", path.display()))?
        }
        None => default_workload(),
    };
    if let Some(v) = args.channels {
        workload.nchs = v;
    }
    if let Some(v) = args.luns {
        workload.nluns = v;
    }
    if let Some(v) = args.blocks {
        workload.nblks = v;
    }
    if let Some(v) = args.pages {
        workload.npgs = v;
    }
    if let Some(v) = args.planes {
        workload.nplanes = v;
    }
    if let Some(v) = args.page_size {
        workload.page_nbytes = v;
    }
    if let Some(v) = args.sb_pus {
        workload.sb_pus = v;
    }
    if let Some(v) = args.sb_blks {
        workload.sb_blks = v;
    }
    if let Some(v) = args.log_blocks {
        workload.log_blocks = v;
    }
    if let Some(path) = &args.trace {
        workload.trace_path = path.clone();
    }
    if workload.trace_path.as_os_str().is_empty() {
        bail!("no trace file: pass --trace or set trace_path in the workload file");
    }
    Ok(workload)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    if args.list_engines {
        for spec in engine_specs() {
            println!("{:>2}  {}", spec.id, spec.name);
        }
        return Ok(());
    }

    let workload = assemble_workload(&args)?;
    let spec = find_engine(&args.engine)
        .with_context(|| format!("unknown engine {:?} (try --list-engines)", args.engine))?;
    let output = driver::run(&workload, spec, &args.output_dir)
        .with_context(|| format!("replay failed for engine {:?}", spec.name))?;
    println!(
        "replayed {} operations; wrote {} and {}",
        output.ops_replayed,
        output.heatmap_path.display(),
        output.iotime_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn flags_override_the_workload_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"nchs": 4, "nluns": 2, "nblks": 16, "npgs": 32,
                "nplanes": 1, "page_nbytes": 8192, "sb_pus": 2,
                "trace_path": "trace.csv"}}"#
        )
        .unwrap();

        let args = Args::parse_from([
            "ftlsim",
            "--workload",
            file.path().to_str().unwrap(),
            "--blocks",
            "8",
        ]);
        let workload = assemble_workload(&args).unwrap();
        assert_eq!(workload.nchs, 4);
        assert_eq!(workload.nblks, 8); // flag wins
        assert_eq!(workload.sb_pus, 2);
        assert_eq!(workload.log_blocks, 10); // serde default
        assert_eq!(workload.trace_path, PathBuf::from("trace.csv"));
    }

    #[test]
    fn missing_trace_is_rejected() {
        let args = Args::parse_from(["ftlsim", "--engine", "inplace"]);
        assert!(assemble_workload(&args).is_err());
    }

    #[test]
    fn trace_flag_alone_is_enough() {
        let args = Args::parse_from(["ftlsim", "--trace", "io.csv"]);
        let workload = assemble_workload(&args).unwrap();
        assert_eq!(workload.trace_path, PathBuf::from("io.csv"));
        assert_eq!(workload.nchs, 2); // built-in default geometry
    }
}
