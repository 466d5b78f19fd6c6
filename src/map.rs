//! Layer and view descriptions for the map page.
//!
//! The browser renders whatever this module describes; colours are RGBA
//! quadruples in 0..=255.

use geojson::FeatureCollection;
use serde::Serialize;

use crate::geometry::{FeatureSet, ROW_DATA_PROPERTY};

pub type Rgba = [u8; 4];

pub const BASE_LAYER_ID: &str = "geojson-layer";
pub const HIGHLIGHT_LAYER_ID: &str = "highlight-layer";

pub const DEFAULT_ZOOM: f64 = 15.0;
pub const DEFAULT_PITCH: f64 = 0.0;

/// Base layer alpha while rows are selected.
pub const DIMMED_ALPHA: u8 = 100;
pub const OPAQUE_ALPHA: u8 = 255;

const BASE_FILL: [u8; 3] = [200, 30, 0];
const BASE_LINE: [u8; 3] = [0, 0, 0];
const HIGHLIGHT_FILL: Rgba = [255, 215, 0, 255];
const HIGHLIGHT_LINE: Rgba = [255, 0, 0, 255];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewState {
    pub latitude: f64,
    pub longitude: f64,
    pub zoom: f64,
    pub pitch: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapLayer {
    pub id: &'static str,
    pub kind: &'static str,
    pub data: FeatureCollection,
    pub pickable: bool,
    pub stroked: bool,
    pub filled: bool,
    pub fill_color: Rgba,
    pub line_color: Rgba,
    pub line_width_min_pixels: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Tooltip {
    /// HTML template; `{row_data}` is replaced with the feature property.
    pub html: String,
    pub background_color: &'static str,
    pub color: &'static str,
}

impl Default for Tooltip {
    fn default() -> Self {
        Self {
            html: format!("<b>Row Data:</b><br/><pre>{{{ROW_DATA_PROPERTY}}}</pre>"),
            background_color: "steelblue",
            color: "white",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MapView {
    pub view_state: ViewState,
    /// Drawing order: base first, highlight on top.
    pub layers: Vec<MapLayer>,
    pub tooltip: Tooltip,
}

fn with_alpha(rgb: [u8; 3], alpha: u8) -> Rgba {
    [rgb[0], rgb[1], rgb[2], alpha]
}

fn layer(
    id: &'static str,
    set: &FeatureSet,
    fill_color: Rgba,
    line_color: Rgba,
    line_width_min_pixels: u32,
) -> MapLayer {
    MapLayer {
        id,
        kind: "GeoJsonLayer",
        data: set.collection.clone(),
        pickable: true,
        stroked: true,
        filled: true,
        fill_color,
        line_color,
        line_width_min_pixels,
    }
}

/// Describe the map for `all` features, drawing `highlight` on top.
///
/// The base layer is dimmed whenever `selection_active`, even if the selected
/// rows have no features to highlight. Returns `None` when there is nothing
/// to centre on.
pub fn build_map_view(
    all: &FeatureSet,
    selection_active: bool,
    highlight: Option<&FeatureSet>,
) -> Option<MapView> {
    let (latitude, longitude) = all.center()?;

    let alpha = if selection_active {
        DIMMED_ALPHA
    } else {
        OPAQUE_ALPHA
    };
    let mut layers = vec![layer(
        BASE_LAYER_ID,
        all,
        with_alpha(BASE_FILL, alpha),
        with_alpha(BASE_LINE, alpha),
        1,
    )];
    if let Some(highlight) = highlight.filter(|h| !h.is_empty()) {
        layers.push(layer(
            HIGHLIGHT_LAYER_ID,
            highlight,
            HIGHLIGHT_FILL,
            HIGHLIGHT_LINE,
            3,
        ));
    }

    Some(MapView {
        view_state: ViewState {
            latitude,
            longitude,
            zoom: DEFAULT_ZOOM,
            pitch: DEFAULT_PITCH,
        },
        layers,
        tooltip: Tooltip::default(),
    })
}
