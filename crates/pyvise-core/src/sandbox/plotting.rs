//! Non-interactive charting surface for sandboxed code
//!
//! Sandboxed scripts draw through a native `plotting` module (alias `plt`)
//! whose calls record figure state into a registry shared with the executor;
//! nothing touches a display, so no execution can block waiting for one.
//! `show()` is accepted and does nothing. After a successful run the
//! executor drains the registry in creation order and rasterizes each open
//! figure to an in-memory PNG.
//!
//! Titles and axis labels are accepted and retained in the figure model, but
//! the bitmap renderer draws data series only, which keeps it free of any
//! font dependency.

use std::sync::{Arc, Mutex, MutexGuard};

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use plotters::prelude::*;
use rustpython_vm::{
    function::FuncArgs, PyObjectRef, PyResult, TryFromObject, VirtualMachine,
};
use thiserror::Error;

pub const PLOT_WIDTH: u32 = 640;
pub const PLOT_HEIGHT: u32 = 480;

const SERIES_COLORS: &[RGBColor] = &[
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
];

#[derive(Debug, Clone)]
pub enum SeriesSpec {
    Line { xs: Vec<f64>, ys: Vec<f64> },
    Scatter { xs: Vec<f64>, ys: Vec<f64> },
    Bars { values: Vec<f64> },
}

#[derive(Debug, Clone, Default)]
pub struct FigureSpec {
    pub series: Vec<SeriesSpec>,
    pub title: Option<String>,
    pub xlabel: Option<String>,
    pub ylabel: Option<String>,
}

/// Per-execution collection of open figures, in creation order.
#[derive(Debug, Clone, Default)]
pub struct FigureRegistry {
    figures: Arc<Mutex<Vec<FigureSpec>>>,
}

impl FigureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_figure(&self) {
        self.lock().push(FigureSpec::default());
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Close every open figure, returning them in creation order.
    pub fn take_all(&self) -> Vec<FigureSpec> {
        std::mem::take(&mut *self.lock())
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn push_series(&self, series: SeriesSpec) {
        let mut figures = self.lock();
        if figures.is_empty() {
            figures.push(FigureSpec::default());
        }
        // Drawing targets the most recently created figure.
        if let Some(current) = figures.last_mut() {
            current.series.push(series);
        }
    }

    fn with_current(&self, apply: impl FnOnce(&mut FigureSpec)) {
        let mut figures = self.lock();
        if figures.is_empty() {
            figures.push(FigureSpec::default());
        }
        if let Some(current) = figures.last_mut() {
            apply(current);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FigureSpec>> {
        self.figures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Build the native `plotting` module bound into a capability environment.
pub fn make_module(vm: &VirtualMachine, registry: FigureRegistry) -> PyObjectRef {
    let module = vm.new_module("plotting", vm.ctx.new_dict(), None);

    let figures = registry.clone();
    let figure_fn = vm.new_function(
        "figure",
        move |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            figures.new_figure();
            Ok(vm.ctx.none())
        },
    );

    let figures = registry.clone();
    let plot_fn = vm.new_function(
        "plot",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let (xs, ys) = xy_arguments(&args, vm)?;
            figures.push_series(SeriesSpec::Line { xs, ys });
            Ok(vm.ctx.none())
        },
    );

    let figures = registry.clone();
    let scatter_fn = vm.new_function(
        "scatter",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let (xs, ys) = xy_arguments(&args, vm)?;
            figures.push_series(SeriesSpec::Scatter { xs, ys });
            Ok(vm.ctx.none())
        },
    );

    let figures = registry.clone();
    let bar_fn = vm.new_function(
        "bar",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            // bar(heights) or bar(labels, heights); labels carry no pixels.
            let heights_arg = match (args.args.first(), args.args.get(1)) {
                (Some(_), Some(second)) => second.clone(),
                (Some(first), None) => first.clone(),
                _ => return Err(vm.new_type_error("bar() expects a sequence of heights".to_owned())),
            };
            let values = number_list(vm, heights_arg)?;
            figures.push_series(SeriesSpec::Bars { values });
            Ok(vm.ctx.none())
        },
    );

    let figures = registry.clone();
    let title_fn = vm.new_function(
        "title",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let text = string_argument(&args, vm);
            figures.with_current(|figure| figure.title = text);
            Ok(vm.ctx.none())
        },
    );

    let figures = registry.clone();
    let xlabel_fn = vm.new_function(
        "xlabel",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let text = string_argument(&args, vm);
            figures.with_current(|figure| figure.xlabel = text);
            Ok(vm.ctx.none())
        },
    );

    let figures = registry.clone();
    let ylabel_fn = vm.new_function(
        "ylabel",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let text = string_argument(&args, vm);
            figures.with_current(|figure| figure.ylabel = text);
            Ok(vm.ctx.none())
        },
    );

    // Non-interactive surface: accepted for compatibility, never blocks.
    let show_fn = vm.new_function(
        "show",
        move |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            Ok(vm.ctx.none())
        },
    );

    let figures = registry;
    let close_fn = vm.new_function(
        "close",
        move |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            figures.clear();
            Ok(vm.ctx.none())
        },
    );

    let _ = module.set_attr("figure", figure_fn, vm);
    let _ = module.set_attr("plot", plot_fn, vm);
    let _ = module.set_attr("scatter", scatter_fn, vm);
    let _ = module.set_attr("bar", bar_fn, vm);
    let _ = module.set_attr("title", title_fn, vm);
    let _ = module.set_attr("xlabel", xlabel_fn, vm);
    let _ = module.set_attr("ylabel", ylabel_fn, vm);
    let _ = module.set_attr("show", show_fn, vm);
    let _ = module.set_attr("close", close_fn, vm);
    module.into()
}

fn string_argument(args: &FuncArgs, vm: &VirtualMachine) -> Option<String> {
    args.args
        .first()
        .and_then(|obj| obj.str(vm).ok())
        .map(|s| s.as_str().to_owned())
}

/// Extract `(xs, ys)` from `plot(ys)` or `plot(xs, ys)` call forms.
fn xy_arguments(args: &FuncArgs, vm: &VirtualMachine) -> PyResult<(Vec<f64>, Vec<f64>)> {
    match (args.args.first(), args.args.get(1)) {
        (Some(xs_obj), Some(ys_obj)) => {
            let xs = number_list(vm, xs_obj.clone())?;
            let ys = number_list(vm, ys_obj.clone())?;
            if xs.len() != ys.len() {
                return Err(vm.new_value_error(format!(
                    "x and y must have the same length ({} vs {})",
                    xs.len(),
                    ys.len()
                )));
            }
            Ok((xs, ys))
        }
        (Some(ys_obj), None) => {
            let ys = number_list(vm, ys_obj.clone())?;
            let xs = (0..ys.len()).map(|i| i as f64).collect();
            Ok((xs, ys))
        }
        _ => Err(vm.new_type_error("expected one or two sequences of numbers".to_owned())),
    }
}

fn number_list(vm: &VirtualMachine, obj: PyObjectRef) -> PyResult<Vec<f64>> {
    let elements = Vec::<PyObjectRef>::try_from_object(vm, obj)
        .map_err(|_| vm.new_type_error("expected a sequence of numbers".to_owned()))?;
    let mut values = Vec::with_capacity(elements.len());
    for element in elements {
        let value = f64::try_from_object(vm, element.clone())
            .or_else(|_| i64::try_from_object(vm, element).map(|v| v as f64))
            .map_err(|_| vm.new_type_error("expected a sequence of numbers".to_owned()))?;
        values.push(value);
    }
    Ok(values)
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("chart rendering failed: {0}")]
    Draw(String),
    #[error("png encoding failed: {0}")]
    Encode(String),
}

/// Rasterize one figure to PNG bytes.
pub fn rasterize(figure: &FigureSpec) -> Result<Vec<u8>, RenderError> {
    let mut rgb = vec![0u8; (PLOT_WIDTH * PLOT_HEIGHT * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut rgb, (PLOT_WIDTH, PLOT_HEIGHT))
            .into_drawing_area();
        root.fill(&WHITE).map_err(|e| RenderError::Draw(e.to_string()))?;

        let (x_range, y_range) = data_bounds(figure);
        let mut chart = ChartBuilder::on(&root)
            .margin(24)
            .build_cartesian_2d(x_range, y_range)
            .map_err(|e| RenderError::Draw(e.to_string()))?;

        for (index, series) in figure.series.iter().enumerate() {
            let color = SERIES_COLORS[index % SERIES_COLORS.len()];
            match series {
                SeriesSpec::Line { xs, ys } => {
                    let points: Vec<(f64, f64)> =
                        xs.iter().copied().zip(ys.iter().copied()).collect();
                    chart
                        .draw_series(LineSeries::new(points, ShapeStyle::from(&color).stroke_width(2)))
                        .map_err(|e| RenderError::Draw(e.to_string()))?;
                }
                SeriesSpec::Scatter { xs, ys } => {
                    chart
                        .draw_series(
                            xs.iter()
                                .copied()
                                .zip(ys.iter().copied())
                                .map(|point| Circle::new(point, 4, color.filled())),
                        )
                        .map_err(|e| RenderError::Draw(e.to_string()))?;
                }
                SeriesSpec::Bars { values } => {
                    chart
                        .draw_series(values.iter().enumerate().map(|(i, value)| {
                            Rectangle::new(
                                [(i as f64 + 0.15, 0.0), (i as f64 + 0.85, *value)],
                                color.filled(),
                            )
                        }))
                        .map_err(|e| RenderError::Draw(e.to_string()))?;
                }
            }
        }

        root.present().map_err(|e| RenderError::Draw(e.to_string()))?;
    }

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(&rgb, PLOT_WIDTH, PLOT_HEIGHT, ExtendedColorType::Rgb8)
        .map_err(|e| RenderError::Encode(e.to_string()))?;
    Ok(png)
}

fn data_bounds(figure: &FigureSpec) -> (std::ops::Range<f64>, std::ops::Range<f64>) {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;

    let mut accumulate = |x: f64, y: f64| {
        if x.is_finite() {
            x_min = x_min.min(x);
            x_max = x_max.max(x);
        }
        if y.is_finite() {
            y_min = y_min.min(y);
            y_max = y_max.max(y);
        }
    };

    for series in &figure.series {
        match series {
            SeriesSpec::Line { xs, ys } | SeriesSpec::Scatter { xs, ys } => {
                for (x, y) in xs.iter().zip(ys.iter()) {
                    accumulate(*x, *y);
                }
            }
            SeriesSpec::Bars { values } => {
                for (i, value) in values.iter().enumerate() {
                    accumulate(i as f64, 0.0);
                    accumulate(i as f64 + 1.0, *value);
                }
            }
        }
    }

    (pad_range(x_min, x_max), pad_range(y_min, y_max))
}

fn pad_range(min: f64, max: f64) -> std::ops::Range<f64> {
    if !min.is_finite() || !max.is_finite() {
        return 0.0..1.0;
    }
    if (max - min).abs() < f64::EPSILON {
        return (min - 1.0)..(max + 1.0);
    }
    let pad = (max - min) * 0.05;
    (min - pad)..(max + pad)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 4] = [0x89, b'P', b'N', b'G'];

    #[test]
    fn test_series_auto_create_first_figure() {
        let registry = FigureRegistry::new();
        registry.push_series(SeriesSpec::Line {
            xs: vec![0.0, 1.0],
            ys: vec![1.0, 2.0],
        });
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_take_all_preserves_creation_order_and_closes() {
        let registry = FigureRegistry::new();
        registry.new_figure();
        registry.with_current(|f| f.title = Some("first".to_string()));
        registry.new_figure();
        registry.with_current(|f| f.title = Some("second".to_string()));

        let figures = registry.take_all();
        assert_eq!(figures.len(), 2);
        assert_eq!(figures[0].title.as_deref(), Some("first"));
        assert_eq!(figures[1].title.as_deref(), Some("second"));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_rasterize_line_figure_produces_png() {
        let figure = FigureSpec {
            series: vec![SeriesSpec::Line {
                xs: vec![0.0, 1.0, 2.0, 3.0],
                ys: vec![0.0, 1.0, 4.0, 9.0],
            }],
            ..Default::default()
        };
        let png = rasterize(&figure).unwrap();
        assert_eq!(&png[..4], &PNG_MAGIC);
    }

    #[test]
    fn test_rasterize_empty_figure_is_blank_not_error() {
        let png = rasterize(&FigureSpec::default()).unwrap();
        assert_eq!(&png[..4], &PNG_MAGIC);
    }

    #[test]
    fn test_bounds_degenerate_data() {
        let figure = FigureSpec {
            series: vec![SeriesSpec::Scatter {
                xs: vec![2.0, 2.0],
                ys: vec![5.0, 5.0],
            }],
            ..Default::default()
        };
        let (x_range, y_range) = data_bounds(&figure);
        assert!(x_range.start < x_range.end);
        assert!(y_range.start < y_range.end);
    }
}
