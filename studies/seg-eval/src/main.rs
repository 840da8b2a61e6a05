//! seg-eval CLI
//!
//! ```bash
//! # score saved predictions against ground truth, six classes
//! seg-eval eval --predictions out/pred --targets data/val/masks --classes 6 --plot cm.svg
//!
//! # same, with the terminal dashboard
//! seg-eval eval --predictions out/pred --targets data/val/masks --classes 6 --tui
//!
//! # re-plot a stored confusion matrix
//! seg-eval plot cm.csv --labels bg,heart,lung --cmap greens -o cm.svg
//! ```

use std::{ fs, path::PathBuf, process::ExitCode, sync::{ mpsc, Arc, Mutex }, thread };

use anyhow::{ anyhow, Context, Result };
use clap::{ Args, Parser, Subcommand };
use seg_eval::{
    data::{ MaskLoader, MaskPairs },
    draw_confusion_matrix,
    Categories,
    Colormap,
    ConfusionMatrix,
    DeviceSpec,
    EvalConfig,
    EvaluationReport,
    Evaluator,
    HeatmapOptions,
    MaskPassthrough,
};
use tracing_subscriber::EnvFilter;
use ui::state::{ EvalState, Progress };

use backend::EvalBackend;

#[cfg(feature = "libtorch")]
mod backend {
    use anyhow::Result;
    use burn::backend::{ libtorch::LibTorchDevice, LibTorch };
    use seg_eval::DeviceSpec;

    pub type EvalBackend = LibTorch;

    pub fn device(spec: DeviceSpec) -> Result<LibTorchDevice> {
        Ok(match spec {
            DeviceSpec::Cpu => LibTorchDevice::Cpu,
            DeviceSpec::Cuda(index) => LibTorchDevice::Cuda(index),
            DeviceSpec::Best if tch::Cuda::is_available() => LibTorchDevice::Cuda(0),
            DeviceSpec::Best => LibTorchDevice::Cpu,
        })
    }
}

#[cfg(all(feature = "wgpu", not(feature = "libtorch")))]
mod backend {
    use anyhow::Result;
    use burn::backend::{ wgpu::WgpuDevice, Wgpu };
    use seg_eval::DeviceSpec;

    pub type EvalBackend = Wgpu;

    pub fn device(spec: DeviceSpec) -> Result<WgpuDevice> {
        Ok(match spec {
            DeviceSpec::Cpu => WgpuDevice::Cpu,
            DeviceSpec::Cuda(index) => WgpuDevice::DiscreteGpu(index),
            DeviceSpec::Best => WgpuDevice::BestAvailable,
        })
    }
}

#[cfg(not(any(feature = "libtorch", feature = "wgpu")))]
mod backend {
    use anyhow::{ bail, Result };
    use burn::backend::{ ndarray::NdArrayDevice, NdArray };
    use seg_eval::DeviceSpec;

    pub type EvalBackend = NdArray;

    pub fn device(spec: DeviceSpec) -> Result<NdArrayDevice> {
        match spec {
            DeviceSpec::Cpu | DeviceSpec::Best => Ok(NdArrayDevice::Cpu),
            DeviceSpec::Cuda(_) =>
                bail!("device {} needs the `libtorch` or `wgpu` feature", String::from(spec)),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "seg-eval", version, about = "Evaluate segmentation masks and plot confusion matrices")]
struct Cli {
    /// TOML file with evaluation and heatmap defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score saved prediction masks against ground-truth masks
    Eval(EvalArgs),
    /// Render a confusion matrix stored as CSV
    Plot(PlotArgs),
}

#[derive(Args, Debug)]
struct EvalArgs {
    /// Directory of predicted masks, pixel value = class index
    #[arg(long)]
    predictions: PathBuf,

    /// Directory of ground-truth masks with matching file names
    #[arg(long)]
    targets: PathBuf,

    #[arg(long)]
    classes: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// cpu, cuda:N or best (default)
    #[arg(long)]
    device: Option<DeviceSpec>,

    /// Write the confusion matrix as CSV
    #[arg(long)]
    matrix_out: Option<PathBuf>,

    /// Write the full report as JSON
    #[arg(long)]
    json_out: Option<PathBuf>,

    /// Write the confusion matrix heatmap as SVG
    #[arg(long)]
    plot: Option<PathBuf>,

    /// Follow the evaluation in a terminal dashboard
    #[arg(long)]
    tui: bool,

    /// Do not print the summary
    #[arg(long, short)]
    quiet: bool,

    #[command(flatten)]
    style: StyleArgs,
}

#[derive(Args, Debug)]
struct PlotArgs {
    /// Headerless CSV, one matrix row per line
    matrix: PathBuf,

    /// Output SVG, defaults to the matrix path with an .svg extension
    #[arg(long, short)]
    out: Option<PathBuf>,

    /// Also show the heatmap in the terminal
    #[arg(long)]
    tui: bool,

    #[command(flatten)]
    style: StyleArgs,
}

#[derive(Args, Debug, Default)]
struct StyleArgs {
    #[arg(long)]
    title: Option<String>,

    /// Comma separated class names for the axes
    #[arg(long, value_delimiter = ',')]
    labels: Option<Vec<String>>,

    /// Comma separated cell labels, row by row
    #[arg(long, value_delimiter = ',')]
    group_names: Option<Vec<String>>,

    #[arg(long)]
    no_count: bool,

    #[arg(long)]
    no_percent: bool,

    #[arg(long)]
    no_cbar: bool,

    #[arg(long)]
    no_ticks: bool,

    #[arg(long)]
    no_axis_labels: bool,

    #[arg(long)]
    no_stats: bool,

    #[arg(long)]
    omit_diagonal: bool,

    #[arg(long, value_enum)]
    cmap: Option<Colormap>,

    /// Width,height in inches
    #[arg(long, value_parser = parse_figsize)]
    figsize: Option<(f64, f64)>,
}

impl StyleArgs {
    fn apply(&self, mut options: HeatmapOptions) -> HeatmapOptions {
        if let Some(title) = &self.title {
            options.title = Some(title.clone());
        }
        if let Some(labels) = &self.labels {
            options.categories = Categories::Labels(labels.clone());
        }
        if let Some(names) = &self.group_names {
            options.group_names = Some(names.clone());
        }
        options.count &= !self.no_count;
        options.percent &= !self.no_percent;
        options.cbar &= !self.no_cbar;
        options.xyticks &= !self.no_ticks;
        options.xyplotlabels &= !self.no_axis_labels;
        options.sum_stats &= !self.no_stats;
        options.omit_diagonal |= self.omit_diagonal;
        if let Some(cmap) = self.cmap {
            options.cmap = cmap;
        }
        if self.figsize.is_some() {
            options.figsize = self.figsize;
        }
        options
    }
}

fn parse_figsize(s: &str) -> std::result::Result<(f64, f64), String> {
    let (w, h) = s.split_once(',').ok_or_else(|| format!("expected WIDTH,HEIGHT, got '{s}'"))?;
    let inches = |v: &str| {
        v.trim()
            .parse::<f64>()
            .ok()
            .filter(|v| *v > 0.0)
            .ok_or_else(|| format!("'{v}' is not a positive size in inches"))
    };
    Ok((inches(w)?, inches(h)?))
}

fn init_tracing(tui: bool) {
    // the dashboard owns the terminal, so stay silent unless asked
    let default = if tui { "off" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let tui = match &cli.command {
        Command::Eval(args) => args.tui,
        Command::Plot(args) => args.tui,
    };
    init_tracing(tui);

    let config = match &cli.config {
        Some(path) => EvalConfig::load(path).context("loading config")?,
        None => EvalConfig::default(),
    };

    match cli.command {
        Command::Eval(args) => eval(args, config),
        Command::Plot(args) => plot(args, config),
    }
}

fn eval(args: EvalArgs, config: EvalConfig) -> Result<()> {
    let classes = args.classes
        .or(config.num_classes)
        .context("number of classes is required (--classes or num_classes in the config)")?;
    let batch_size = args.batch_size.unwrap_or(config.batch_size);
    let device = backend::device(args.device.unwrap_or(config.device))?;
    let heatmap = args.style.apply(config.heatmap.clone());
    let verbose = config.verbose && !args.quiet;

    let dataset = MaskPairs::new(&args.predictions, &args.targets, classes)?;
    dataset.print();
    let loader = MaskLoader::new(dataset, batch_size);
    let batches = loader.len_batch();

    let evaluator = Evaluator::<EvalBackend>::new()
        .with_device(device)
        .with_num_classes(classes)
        .with_heatmap(heatmap.clone());

    let report = if args.tui {
        let (tx, rx) = mpsc::channel();
        let (state_nn, listener) = ui::listen(rx);
        let evaluator = evaluator.with_verbose(false).with_progress(tx, Some(batches));

        let worker = thread::spawn(move || evaluator.evaluate(&MaskPassthrough, loader));
        ui::run_dashboard(state_nn).map_err(|e| anyhow!("dashboard failed: {e:?}"))?;
        if !worker.is_finished() {
            eprintln!("dashboard closed, waiting for the evaluation to finish...");
        }

        let report = worker.join().map_err(|_| anyhow!("evaluation thread panicked"))??;
        listener.join().map_err(|_| anyhow!("dashboard listener panicked"))?;
        if verbose {
            println!("{report}");
        }
        report
    } else {
        evaluator.with_verbose(verbose).evaluate(&MaskPassthrough, loader)?
    };

    if verbose {
        println!("{}", report.confusion);
    }
    write_outputs(&report, &args, &heatmap)
}

fn write_outputs(report: &EvaluationReport, args: &EvalArgs, heatmap: &HeatmapOptions) -> Result<()> {
    if let Some(path) = &args.matrix_out {
        report.confusion
            .write_csv(path)
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "saved confusion matrix");
    }
    if let Some(path) = &args.json_out {
        fs::write(path, report.to_json()?).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "saved report");
    }
    if let Some(path) = &args.plot {
        draw_confusion_matrix(&report.confusion, heatmap)?.save_svg(path)?;
    }
    Ok(())
}

fn plot(args: PlotArgs, config: EvalConfig) -> Result<()> {
    let matrix = ConfusionMatrix::read_csv(&args.matrix).with_context(||
        format!("reading {}", args.matrix.display())
    )?;
    let options = args.style.apply(config.heatmap);
    let figure = draw_confusion_matrix(&matrix, &options)?;

    let out = args.out.clone().unwrap_or_else(|| args.matrix.with_extension("svg"));
    figure.save_svg(&out)?;

    if args.tui {
        let state = EvalState {
            model: args.matrix
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            progress: Progress {
                samples: matrix.total(),
                finished: true,
                ..Progress::default()
            },
            heatmap: Some(figure.to_heatmap()),
            ..EvalState::default()
        };
        ui::run_dashboard(Arc::new(Mutex::new(state))).map_err(|e| anyhow!("dashboard failed: {e:?}"))?;
    }
    Ok(())
}
