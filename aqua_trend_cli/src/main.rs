use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use aqua_trend::{
    build_visualization, fit, load_params, parse_records, species_names, species_trend,
    FishRecord, Measurement, Params, Point, SpeciesTrend, TrendError, Trendline, Visualization,
};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use plotters::prelude::*;
use rayon::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Fish measurement trendline CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit a least-squares line through x,y points (CSV or JSON)
    Fit(FitArgs),
    /// Build the fish visualisation report and charts from a Fish.csv/JSON file
    Visualize(VisualizeArgs),
    /// Count samples per species
    Species(SpeciesArgs),
}

#[derive(Parser, Debug)]
struct FitArgs {
    /// Two-column CSV (optional header) or JSON array of {"x","y"} objects
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Output JSON path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct VisualizeArgs {
    /// Fish measurement file (.csv or .json)
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Output report JSON path (`-` for stdout)
    #[arg(short, long, default_value = "fish_report.json", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Params JSON file; command-line flags take precedence
    #[arg(long, value_hint = ValueHint::FilePath)]
    params: Option<PathBuf>,

    /// Measurement on the x axis (weight|length1|length2|length3|height|width)
    #[arg(long)]
    x: Option<Measurement>,

    /// Measurement on the y axis
    #[arg(long)]
    y: Option<Measurement>,

    /// Species to overlay with a regression line
    #[arg(long)]
    species: Option<String>,

    /// Minimum samples before a species gets a trendline
    #[arg(long)]
    min_samples: Option<usize>,

    /// Output PNG figure path (defaults next to the report)
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Output SVG figure path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Disable plot generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    /// Optional CSV with one trendline row per species
    #[arg(long, value_hint = ValueHint::FilePath)]
    species_csv: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct SpeciesArgs {
    /// Fish measurement file (.csv or .json)
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Fit(args) => args.verbose,
        Command::Visualize(args) => args.verbose,
        Command::Species(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Visualize(args) => handle_visualize(args),
        Command::Species(args) => handle_species(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<()> {
    let data = fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let points = parse_points(&data, &format_hint(&args.input))
        .with_context(|| format!("failed to parse {}", args.input.display()))?;
    debug!("Loaded {} points from {}", points.len(), args.input.display());

    let result = fit(&points).with_context(|| {
        format!(
            "cannot fit a trendline through {} ({} points)",
            args.input.display(),
            points.len()
        )
    })?;
    info!(
        "Fitted y = {:.6}x + {:.6} over x in [{}, {}]",
        result.slope, result.intercept, result.line_segment.0.x, result.line_segment.1.x
    );

    write_json(&result, &args.output)
}

/// Params file (or defaults) with command-line flags applied on top.
fn resolve_params(args: &VisualizeArgs) -> Result<Params> {
    let mut params = match args.params.as_ref() {
        Some(path) => load_params(path)
            .with_context(|| format!("failed to load params {}", path.display()))?,
        None => Params::default(),
    };
    if let Some(x) = args.x {
        params.x_measure = x;
    }
    if let Some(y) = args.y {
        params.y_measure = y;
    }
    if let Some(species) = args.species.as_ref() {
        params.species = Some(species.clone());
    }
    if let Some(min_samples) = args.min_samples {
        params.min_species_samples = min_samples;
    }
    params.validate()?;
    Ok(params)
}

fn handle_visualize(args: VisualizeArgs) -> Result<()> {
    let params = resolve_params(&args)?;
    debug!("Resolved params: {:?}", params);

    let t_parse = Instant::now();
    let records = read_records(&args.input)?;
    info!(
        "Parsed {} records from {} in {:.1} ms",
        records.len(),
        args.input.display(),
        t_parse.elapsed().as_secs_f64() * 1000.0
    );

    let report = build_visualization(&records, &params)?;
    match report.focus.as_ref() {
        Some(focus) => match focus.trendline.fitted() {
            Some(fitted) => info!(
                "{}: y = {:.4}x + {:.4} from {} samples",
                focus.species,
                fitted.slope,
                fitted.intercept,
                focus.points.len()
            ),
            None => warn!("{}: trendline omitted", focus.species),
        },
        None => debug!("No focus species requested"),
    }

    if let Some(path) = args.species_csv.as_ref() {
        let trends = fit_all_species(&records, &params)?;
        write_species_csv(&trends, path)?;
        info!("Wrote species table: {}", path.display());
    }

    write_json(&report, &args.output)?;
    if args.output.as_os_str() != "-" {
        info!("Wrote report: {}", args.output.display());
    }

    if args.no_plot {
        return Ok(());
    }
    let mut targets: Vec<(PathBuf, ChartKind)> = Vec::new();
    if let Some(path) = args.png.as_ref() {
        targets.push((path.clone(), ChartKind::Png));
    }
    if let Some(path) = args.svg.as_ref() {
        targets.push((path.clone(), ChartKind::Svg));
    }
    if targets.is_empty() {
        targets.push((default_png_path(&args.output), ChartKind::Png));
    }
    for (path, kind) in targets {
        match render_chart_guard(&report, &path, kind) {
            Err(err) => warn!("Skipping plot render ({}): {}", path.display(), err),
            Ok(()) => info!(
                "Wrote plots: {} and {}",
                path.display(),
                derive_weight_path(&path).display()
            ),
        }
    }
    Ok(())
}

fn handle_species(args: SpeciesArgs) -> Result<()> {
    let records = read_records(&args.input)?;
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in &records {
        *counts.entry(record.species.as_str()).or_default() += 1;
    }
    info!("{} records across {} species", records.len(), counts.len());

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for (species, count) in counts {
        writeln!(handle, "{species}\t{count}")?;
    }
    Ok(())
}

fn format_hint(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("csv")
        .to_string()
}

fn read_records(path: &Path) -> Result<Vec<FishRecord>> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let records = parse_records(&data, &format_hint(path))
        .with_context(|| format!("failed to parse {}", path.display()))?;
    if records.is_empty() {
        bail!("{} contains no records", path.display());
    }
    Ok(records)
}

fn parse_points(data: &[u8], hint: &str) -> Result<Vec<Point>> {
    if hint.eq_ignore_ascii_case("json") {
        return serde_json::from_slice(data).context("expected a JSON array of {\"x\", \"y\"}");
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);
    let mut points = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row?;
        if row.len() < 2 {
            bail!("line {}: expected two columns, got {}", idx + 1, row.len());
        }
        match (row[0].parse::<f64>(), row[1].parse::<f64>()) {
            (Ok(x), Ok(y)) => points.push(Point::new(x, y)),
            // Header row.
            _ if idx == 0 => continue,
            _ => bail!(
                "line {}: expected two numbers, got {:?}, {:?}",
                idx + 1,
                &row[0],
                &row[1]
            ),
        }
    }
    Ok(points)
}

/// Trendline per species, fitted in parallel.
fn fit_all_species(records: &[FishRecord], params: &Params) -> Result<Vec<SpeciesTrend>> {
    let names = species_names(records);
    let trends = names
        .par_iter()
        .map(|name| {
            species_trend(
                records,
                params.x_measure,
                params.y_measure,
                name,
                params.min_species_samples,
            )
        })
        .filter_map(|res| match res {
            Ok(trend) => Some(Ok(trend)),
            // Species with no complete (x, y) pair have nothing to tabulate.
            Err(TrendError::UnknownSpecies(_)) => None,
            Err(err) => Some(Err(anyhow!(err))),
        })
        .collect::<Result<Vec<_>>>()?;
    for trend in &trends {
        if trend.trendline.fitted().is_none() {
            debug!("{}: no trendline", trend.species);
        }
    }
    Ok(trends)
}

fn write_json<T: serde::Serialize>(value: &T, path: &Path) -> Result<()> {
    if path.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        serde_json::to_writer_pretty(&mut handle, value)?;
        writeln!(handle)?;
        return Ok(());
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn write_species_csv(trends: &[SpeciesTrend], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_species_rows(trends, &mut writer)
}

fn write_species_rows<W: Write>(trends: &[SpeciesTrend], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "species",
        "samples",
        "mean_x",
        "mean_y",
        "correlation",
        "slope",
        "intercept",
        "x_min",
        "x_max",
        "note",
    ])?;

    for trend in trends {
        let summary = &trend.summary;
        let fitted = trend.trendline.fitted();
        let note = match &trend.trendline {
            Trendline::Fitted(_) => String::new(),
            Trendline::Omitted { reason } => reason.clone(),
        };
        let fmt = |v: Option<f64>| v.map(|v| format!("{:.4}", v)).unwrap_or_default();
        writer.write_record([
            trend.species.clone(),
            summary.samples.to_string(),
            format!("{:.3}", summary.mean_x),
            format!("{:.3}", summary.mean_y),
            fmt(summary.correlation),
            fmt(fitted.map(|f| f.slope)),
            fmt(fitted.map(|f| f.intercept)),
            fmt(fitted.map(|f| f.line_segment.0.x)),
            fmt(fitted.map(|f| f.line_segment.1.x)),
            note,
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChartKind {
    Png,
    Svg,
}

const POINT_GREY: RGBColor = RGBColor(150, 150, 150);
const DODGER_BLUE: RGBColor = RGBColor(30, 144, 255);
const CRIMSON: RGBColor = RGBColor(220, 20, 60);
const BAR_BLUE: RGBColor = RGBColor(52, 152, 219);

fn default_png_path(report_path: &Path) -> PathBuf {
    if report_path.as_os_str() == "-" {
        PathBuf::from("fish_report.png")
    } else {
        report_path.with_extension("png")
    }
}

fn derive_weight_path(base: &Path) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("fish_report");
    let ext = base.extension().and_then(|s| s.to_str()).unwrap_or("png");
    base.with_file_name(format!("{}_weight.{}", stem, ext))
}

fn render_chart_guard(report: &Visualization, path: &Path, kind: ChartKind) -> Result<(), String> {
    let render = || -> Result<()> {
        let weight_path = derive_weight_path(path);
        match kind {
            ChartKind::Png => {
                let root = BitMapBackend::new(path, (1280, 860)).into_drawing_area();
                draw_scatter_chart(root, report)?;
                let root = BitMapBackend::new(&weight_path, (1280, 720)).into_drawing_area();
                draw_weight_chart(root, report)?;
            }
            ChartKind::Svg => {
                let root = SVGBackend::new(path, (1280, 860)).into_drawing_area();
                draw_scatter_chart(root, report)?;
                let root = SVGBackend::new(&weight_path, (1280, 720)).into_drawing_area();
                draw_weight_chart(root, report)?;
            }
        }
        Ok(())
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
        .map_err(|e| format!("plotting error: {}", e))
}

/// Padded axis range covering `values`; flat or empty data still gets a usable span.
fn axis_range(values: impl Iterator<Item = f64>) -> std::ops::Range<f64> {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        return 0.0..1.0;
    }
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 1.0 };
    (lo - pad)..(hi + pad)
}

fn draw_scatter_chart<DB>(
    root: DrawingArea<DB, plotters::coord::Shift>,
    report: &Visualization,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;

    let x_range = axis_range(report.scatter.iter().map(|p| p.x));
    let y_range = axis_range(report.scatter.iter().map(|p| p.y));
    let title = match report.focus.as_ref() {
        Some(focus) => match focus.summary.correlation {
            Some(r) => format!(
                "{} vs {}: {} (r = {:.2})",
                report.y_measure, report.x_measure, focus.species, r
            ),
            None => format!("{} vs {}: {}", report.y_measure, report.x_measure, focus.species),
        },
        None => format!("{} vs {}", report.y_measure, report.x_measure),
    };

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 28))
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .build_cartesian_2d(x_range, y_range)?;

    chart
        .configure_mesh()
        .x_desc(report.x_measure.label())
        .y_desc(report.y_measure.label())
        .x_label_formatter(&|v| format!("{:.1}", v))
        .y_label_formatter(&|v| format!("{:.1}", v))
        .draw()?;

    chart
        .draw_series(
            report
                .scatter
                .iter()
                .map(|p| Circle::new((p.x, p.y), 3, POINT_GREY.filled())),
        )?
        .label("All species")
        .legend(|(x, y)| Circle::new((x, y), 3, POINT_GREY.filled()));

    if let Some(focus) = report.focus.as_ref() {
        chart
            .draw_series(
                focus
                    .points
                    .iter()
                    .map(|p| Circle::new((p.x, p.y), 4, DODGER_BLUE.filled())),
            )?
            .label(focus.species.clone())
            .legend(|(x, y)| Circle::new((x, y), 4, DODGER_BLUE.filled()));

        if let Some(fitted) = focus.trendline.fitted() {
            let (start, end) = fitted.line_segment;
            chart
                .draw_series(LineSeries::new(
                    [(start.x, start.y), (end.x, end.y)],
                    CRIMSON.stroke_width(2),
                ))?
                .label(format!(
                    "y = {:.3}x {} {:.3}",
                    fitted.slope,
                    if fitted.intercept < 0.0 { '-' } else { '+' },
                    fitted.intercept.abs()
                ))
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], &CRIMSON));
        }
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.85))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

fn draw_weight_chart<DB>(
    root: DrawingArea<DB, plotters::coord::Shift>,
    report: &Visualization,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let weights = &report.average_weight;
    if weights.is_empty() {
        root.present()?;
        return Ok(());
    }

    let y_max = weights
        .iter()
        .map(|w| w.mean_weight_g)
        .fold(1.0, f64::max)
        * 1.1;
    let names: Vec<&str> = weights.iter().map(|w| w.species.as_str()).collect();

    let mut chart = ChartBuilder::on(&root)
        .caption("Mean weight by species", ("sans-serif", 28))
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .build_cartesian_2d((0..weights.len()).into_segmented(), 0.0..y_max)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(weights.len())
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(idx) => names.get(*idx).map(|s| s.to_string()).unwrap_or_default(),
            _ => String::new(),
        })
        .y_desc(Measurement::Weight.label())
        .draw()?;

    chart.draw_series(weights.iter().enumerate().map(|(idx, w)| {
        Rectangle::new(
            [
                (SegmentValue::Exact(idx), 0.0),
                (SegmentValue::Exact(idx + 1), w.mean_weight_g),
            ],
            BAR_BLUE.filled(),
        )
    }))?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_points_csv_with_header() {
        let points = parse_points(b"length,width\n1,2\n2, 4\n3,5\n", "csv").unwrap();
        assert_eq!(
            points,
            vec![Point::new(1.0, 2.0), Point::new(2.0, 4.0), Point::new(3.0, 5.0)]
        );
    }

    #[test]
    fn test_parse_points_csv_rejects_bad_row() {
        let err = parse_points(b"1,2\nx,4\n", "csv").unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(parse_points(b"1\n", "csv").is_err());
    }

    #[test]
    fn test_parse_points_json() {
        let points = parse_points(br#"[{"x": 1.5, "y": -2}, {"x": 3, "y": 0.5}]"#, "JSON").unwrap();
        assert_eq!(points, vec![Point::new(1.5, -2.0), Point::new(3.0, 0.5)]);
    }

    #[test]
    fn test_params_file_overridden_by_flags() {
        let dir = tempfile::tempdir().unwrap();
        let params_path = dir.path().join("params.json");
        fs::write(
            &params_path,
            r#"{"x_measure": "Length2", "y_measure": "Height", "species": "Bream", "min_species_samples": 4}"#,
        )
        .unwrap();
        let cli = Cli::try_parse_from([
            "aqua-trend",
            "visualize",
            "Fish.csv",
            "--params",
            params_path.to_str().unwrap(),
            "--species",
            "Perch",
            "--x",
            "Length3(cm)",
        ])
        .unwrap();
        let Command::Visualize(args) = cli.command else {
            panic!("expected the visualize subcommand");
        };
        let params = resolve_params(&args).unwrap();
        assert_eq!(params.x_measure, Measurement::Length3);
        assert_eq!(params.y_measure, Measurement::Height);
        assert_eq!(params.species.as_deref(), Some("Perch"));
        assert_eq!(params.min_species_samples, 4);
    }

    #[test]
    fn test_resolve_params_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let cli = Cli::try_parse_from([
            "aqua-trend",
            "visualize",
            "Fish.csv",
            "--params",
            missing.to_str().unwrap(),
        ])
        .unwrap();
        let Command::Visualize(args) = cli.command else {
            panic!("expected the visualize subcommand");
        };
        let err = resolve_params(&args).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TrendError>(),
            Some(TrendError::ParamsUnavailable(_))
        ));
    }

    #[test]
    fn test_write_json_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fit.json");
        let result = fit(&[Point::new(0.0, 1.0), Point::new(2.0, 5.0)]).unwrap();
        write_json(&result, &path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["slope"], 2.0);
        assert_eq!(value["intercept"], 1.0);
    }

    #[test]
    fn test_derive_weight_path() {
        assert_eq!(
            derive_weight_path(Path::new("out/fish.svg")),
            PathBuf::from("out/fish_weight.svg")
        );
        assert_eq!(default_png_path(Path::new("-")), PathBuf::from("fish_report.png"));
        assert_eq!(
            default_png_path(Path::new("reports/perch.json")),
            PathBuf::from("reports/perch.png")
        );
    }

    #[test]
    fn test_axis_range_pads_flat_and_empty() {
        assert_eq!(axis_range([2.0, 2.0].into_iter()), 1.0..3.0);
        assert_eq!(axis_range(std::iter::empty()), 0.0..1.0);
        let r = axis_range([0.0, 10.0].into_iter());
        assert!((r.start + 0.5).abs() < 1e-12 && (r.end - 10.5).abs() < 1e-12);
    }

    #[test]
    fn test_species_rows_include_omitted_reason() {
        let records = parse_records(
            b"Species,Weight,Length1,Length2,Length3,Height,Width\nPike,200,30,32.3,34.8,5.568,3.3756\nPike,300,31.7,34,37.8,5.7078,4.158\nSmelt,6.7,9.3,9.8,10.8,1.7388,1.0476\n",
            "csv",
        )
        .unwrap();
        let trends = fit_all_species(&records, &Params::default()).unwrap();
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_species_rows(&trends, &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("Pike,2,"));
        assert!(lines[2].starts_with("Smelt,1,"));
        assert!(lines[2].contains("need at least 2 samples"));
    }
}
