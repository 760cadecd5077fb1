//! Command-line driver for projected knowledge compilation.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::info;
use simplelog::{ColorChoice, CombinedLogger, LevelFilter, SharedLogger, TermLogger, TerminalMode, WriteLogger};

use pkc_rs::project::{Mode, Options, Projector, TseitinPolicy};
use pkc_rs::D4Version;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum ModeArg {
    /// Compile without trimming, then run the projecting traversal.
    #[value(alias = "i")]
    Incremental,
    /// Compile with trimming, relying on Tseitin classification.
    #[value(alias = "t")]
    Tseitin,
    /// Compile with trimming, then recompile the clausified result.
    #[value(alias = "m")]
    Monolithic,
    /// Defer projection-variable splits to the external compiler.
    #[value(alias = "d")]
    Deferred,
    /// Compile without projection.
    #[value(alias = "c")]
    Compile,
    /// Stop after preprocessing.
    #[value(alias = "p")]
    Preprocess,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum TseitinArg {
    #[value(alias = "n")]
    None,
    #[value(alias = "d")]
    Detect,
    #[value(alias = "p")]
    Promote,
}

/// Projected knowledge compilation and exact model counting.
#[derive(Parser, Debug)]
#[command(name = "pkc", version, about)]
struct Args {
    /// Input CNF file (DIMACS, with `c p show` / `c p weight` extensions)
    formula: PathBuf,

    /// Output POG file
    pog: Option<PathBuf>,

    /// Operating mode
    #[arg(short, long, value_enum, default_value_t = ModeArg::Incremental)]
    mode: ModeArg,

    /// Preprocessing level (0: none, 1: +BCP, 2: +pure literals,
    /// 3: +BVE(1), >=4: +BVE(n-2))
    #[arg(short = 'P', long, default_value_t = 4)]
    preprocess: u32,

    /// Tseitin variable handling
    #[arg(short = 'T', long, value_enum, default_value_t = TseitinArg::Promote)]
    tseitin: TseitinArg,

    /// Optimization level (0: none, 1: +reuse, 2: +variable analysis,
    /// 3: +builtin KC, 4: +subsumption check)
    #[arg(short = 'O', long, default_value_t = 4)]
    optlevel: u32,

    /// Upper bound on clause count for the builtin knowledge compiler
    /// [default: 70, or 0 in monolithic mode]
    #[arg(short = 'b', long)]
    bkc_limit: Option<usize>,

    /// Keep intermediate files
    #[arg(short, long)]
    keep: bool,

    /// Use the original d4, rather than d4 version 2
    #[arg(long = "d4-v1")]
    d4_v1: bool,

    /// Path to the external D-DNNF compiler executable
    #[arg(long)]
    d4_path: Option<PathBuf>,

    /// Record the log to a file
    #[arg(short = 'L', long)]
    logfile: Option<PathBuf>,

    /// Verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(args: &Args) {
    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(path) = &args.logfile {
        match File::create(path) {
            Ok(file) => loggers.push(WriteLogger::new(
                LevelFilter::Debug,
                simplelog::Config::default(),
                file,
            )),
            Err(e) => eprintln!("couldn't open log file '{}': {}", path.display(), e),
        }
    }
    CombinedLogger::init(loggers).expect("logger already initialized");
}

fn run(args: &Args) -> Result<(), pkc_rs::PkcError> {
    let opts = Options {
        mode: match args.mode {
            ModeArg::Incremental => Mode::Incremental,
            ModeArg::Tseitin => Mode::Tseitin,
            ModeArg::Monolithic => Mode::Monolithic,
            ModeArg::Deferred => Mode::Deferred,
            ModeArg::Compile => Mode::Compile,
            ModeArg::Preprocess => Mode::Preprocess,
        },
        preprocess_level: args.preprocess,
        tseitin: match args.tseitin {
            TseitinArg::None => TseitinPolicy::None,
            TseitinArg::Detect => TseitinPolicy::Detect,
            TseitinArg::Promote => TseitinPolicy::Promote,
        },
        optlevel: args.optlevel,
        // Monolithic mode disables the builtin compiler by default.
        bkc_limit: args
            .bkc_limit
            .unwrap_or(if args.mode == ModeArg::Monolithic { 0 } else { 70 }),
        keep_files: args.keep,
        d4_version: if args.d4_v1 { D4Version::V1 } else { D4Version::V2 },
        d4_path: args.d4_path.clone(),
    };
    let mut proj = Projector::from_path(&args.formula, &opts)?;
    if opts.mode == Mode::Preprocess {
        return Ok(());
    }
    info!("initial compilation completed");
    proj.projecting_compile()?;
    info!("projecting compilation completed");
    if let Some(pog_path) = &args.pog {
        let file = File::create(pog_path)?;
        let mut w = BufWriter::new(file);
        proj.write(&mut w)?;
    }
    proj.log_summary();
    if let Some(ucount) = proj.count(false)? {
        println!("Unweighted count: {}", ucount);
    }
    if let Some(wcount) = proj.count(true)? {
        println!("Weighted count: {}", wcount);
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pkc: {}", e);
            ExitCode::FAILURE
        }
    }
}
