//! Browser bindings: the dashboard's chart layer calls these to get
//! trendlines and reports, and optionally to draw them with Plotly.

use aqua_trend::{build_visualization, fit, parse_records, Params, Point, TrendError, Visualization};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use wasm_bindgen::prelude::*;

#[cfg(feature = "chart_plotly")]
use wasm_bindgen::JsCast;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_COMMIT: &str = env!("GIT_COMMIT_HASH");
const BUILD_PROFILE: &str = env!("AQUA_TREND_BUILD_PROFILE");

fn to_js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// Serialise maps as plain objects so Plotly and JSON.stringify see them.
fn to_js_object<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(to_js_error)
}

fn points_from_columns(xs: &[f64], ys: &[f64]) -> Result<Vec<Point>, String> {
    if xs.len() != ys.len() {
        return Err(format!(
            "x and y must have the same length (got {} and {})",
            xs.len(),
            ys.len()
        ));
    }
    Ok(xs
        .iter()
        .zip(ys)
        .map(|(&x, &y)| Point::new(x, y))
        .collect())
}

fn params_from_js(value: JsValue) -> Result<Params, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(Params::default());
    }
    let params: Params = serde_wasm_bindgen::from_value(value).map_err(to_js_error)?;
    params.validate().map_err(to_js_error)?;
    Ok(params)
}

fn compute_visualization(
    bytes: &[u8],
    format: &str,
    params: &Params,
) -> Result<Visualization, TrendError> {
    let records = parse_records(bytes, format)?;
    build_visualization(&records, params)
}

/// Least-squares trendline through paired columns.
#[wasm_bindgen]
pub fn fit_trendline(xs: &[f64], ys: &[f64]) -> Result<JsValue, JsValue> {
    let points = points_from_columns(xs, ys).map_err(to_js_error)?;
    let result = fit(&points).map_err(to_js_error)?;
    to_js_object(&result)
}

/// Full visualisation report for an uploaded Fish.csv/JSON file.
#[wasm_bindgen]
pub fn visualize_fish(bytes: &[u8], format: &str, params: JsValue) -> Result<JsValue, JsValue> {
    let params = params_from_js(params)?;
    let report = compute_visualization(bytes, format, &params).map_err(to_js_error)?;
    to_js_object(&report)
}

#[wasm_bindgen]
pub fn build_info() -> String {
    format!("aqua_trend {} ({}, {})", APP_VERSION, APP_COMMIT, BUILD_PROFILE)
}

fn scatter_trace(name: &str, x: &[f64], y: &[f64], color: &str, size: u32) -> JsonValue {
    json!({
        "type": "scatter",
        "mode": "markers",
        "name": name,
        "x": x,
        "y": y,
        "marker": { "color": color, "size": size, "opacity": 0.6 },
    })
}

fn line_trace(name: &str, x: &[f64], y: &[f64], dash: &str, color: &str) -> JsonValue {
    json!({
        "type": "scatter",
        "mode": "lines",
        "name": name,
        "x": x,
        "y": y,
        "line": { "dash": dash, "color": color, "width": 2 },
    })
}

fn unzip_points(points: &[Point]) -> (Vec<f64>, Vec<f64>) {
    points.iter().map(|p| (p.x, p.y)).unzip()
}

/// Plotly traces: every sample in grey, the focus species on top, then its trendline.
fn report_traces(report: &Visualization) -> Vec<JsonValue> {
    let mut traces = Vec::new();
    let (xs, ys) = unzip_points(&report.scatter);
    traces.push(scatter_trace("All species", &xs, &ys, "#999999", 6));

    if let Some(focus) = report.focus.as_ref() {
        let (fx, fy) = unzip_points(&focus.points);
        traces.push(scatter_trace(&focus.species, &fx, &fy, "dodgerblue", 8));
        if let Some(fitted) = focus.trendline.fitted() {
            let (start, end) = fitted.line_segment;
            traces.push(line_trace(
                &format!("y = {:.3}x + {:.3}", fitted.slope, fitted.intercept),
                &[start.x, end.x],
                &[start.y, end.y],
                "dash",
                "crimson",
            ));
        }
    }
    traces
}

fn report_layout(report: &Visualization) -> JsonValue {
    let mut title = format!("{} vs {}", report.y_measure, report.x_measure);
    if let Some(focus) = report.focus.as_ref() {
        title.push_str(&format!(": {}", focus.species));
        if let Some(r) = focus.summary.correlation {
            title.push_str(&format!(" (r = {:.2})", r));
        }
    }
    json!({
        "title": { "text": title },
        "xaxis": { "title": { "text": report.x_measure.label() } },
        "yaxis": { "title": { "text": report.y_measure.label() } },
        "hovermode": "closest",
        "legend": { "orientation": "h" },
    })
}

/// `Plotly.react` when present (older bundles only ship `newPlot`).
#[cfg(feature = "chart_plotly")]
fn plotly_function(plotly: &JsValue) -> Result<js_sys::Function, JsValue> {
    let react = js_sys::Reflect::get(plotly, &JsValue::from_str("react"))?;
    let func = if react.is_function() {
        react
    } else {
        js_sys::Reflect::get(plotly, &JsValue::from_str("newPlot"))?
    };
    func.dyn_into::<js_sys::Function>()
        .map_err(|_| JsValue::from_str("Plotly has neither react nor newPlot"))
}

#[cfg(feature = "chart_plotly")]
fn plot_xy(div_id: &str, traces: &JsValue, layout: &JsValue) -> Result<(), JsValue> {
    let document = web_sys::window()
        .and_then(|w| w.document())
        .ok_or_else(|| JsValue::from_str("no document available"))?;
    let div = document
        .get_element_by_id(div_id)
        .ok_or_else(|| JsValue::from_str(&format!("no element with id '{}'", div_id)))?;
    let plotly = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str("Plotly"))?;
    if plotly.is_undefined() {
        return Err(JsValue::from_str("Plotly is not loaded"));
    }
    let func = plotly_function(&plotly)?;
    func.call3(&JsValue::NULL, &JsValue::from(div), traces, layout)?;
    Ok(())
}

/// Build the report and draw it into `div_id`; returns the report for the caller.
#[cfg(feature = "chart_plotly")]
#[wasm_bindgen]
pub fn render_species_plot(
    div_id: &str,
    bytes: &[u8],
    format: &str,
    params: JsValue,
) -> Result<JsValue, JsValue> {
    let params = params_from_js(params)?;
    let report = compute_visualization(bytes, format, &params).map_err(to_js_error)?;
    let traces = to_js_object(&report_traces(&report))?;
    let layout = to_js_object(&report_layout(&report))?;
    plot_xy(div_id, &traces, &layout)?;
    to_js_object(&report)
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
}


#[cfg(all(test, target_arch = "wasm32", feature = "chart_plotly"))]
mod wasm_tests {
    use super::*;
    use wasm_bindgen_test::wasm_bindgen_test;

    fn plotly_stub(methods: &[&str]) -> JsValue {
        let obj = js_sys::Object::new();
        for name in methods {
            let func = js_sys::Function::new_no_args(&format!("return '{}';", name));
            js_sys::Reflect::set(&obj, &JsValue::from_str(name), &func).unwrap();
        }
        obj.into()
    }

    fn called(func: &js_sys::Function) -> JsValue {
        func.call0(&JsValue::NULL).unwrap()
    }

    #[wasm_bindgen_test]
    fn test_plotly_prefers_react() {
        let func = plotly_function(&plotly_stub(&["react", "newPlot"])).unwrap();
        assert_eq!(called(&func), "react");
    }

    #[wasm_bindgen_test]
    fn test_plotly_falls_back_to_new_plot() {
        let func = plotly_function(&plotly_stub(&["newPlot"])).unwrap();
        assert_eq!(called(&func), "newPlot");
    }

    #[wasm_bindgen_test]
    fn test_plotly_without_plot_functions_is_error() {
        assert!(plotly_function(&plotly_stub(&[])).is_err());
    }
}
