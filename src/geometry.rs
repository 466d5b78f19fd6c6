//! Geometry pipeline for the map page.
//!
//! Rows carry a `geometry` column holding a GeoJSON feature collection in the
//! source coordinate system. The pipeline flattens those collections into one
//! feature list, tags every feature with its row's other columns, and
//! reprojects to WGS84 longitude/latitude for display.

use geo::{Centroid, MultiPoint, Point};
use geojson::{Feature, FeatureCollection, Geometry, Value as GeoValue};
use proj4rs::proj::Proj;
use serde_json::Value;
use tracing::debug;

use crate::error::PortalError;
use crate::model::{Cell, Table};

pub const GEOMETRY_COLUMN: &str = "geometry";
pub const ROW_DATA_PROPERTY: &str = "row_data";

/// EPSG:4326.
pub const WGS84: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// A feature paired with its owning row's attributes.
#[derive(Debug, Clone)]
pub struct RowFeature {
    pub feature: Feature,
    /// Non-geometry columns of the owning row as pretty-printed JSON.
    pub row_data: String,
}

/// Reprojected features ready for display.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub collection: FeatureCollection,
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self::from_features(Vec::new())
    }
}

impl FeatureSet {
    pub fn from_features(features: Vec<Feature>) -> Self {
        Self {
            collection: FeatureCollection {
                bbox: None,
                features,
                foreign_members: None,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.collection.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.features.is_empty()
    }

    /// Centroid of the union of all feature centroids, as `(lat, lon)`.
    pub fn center(&self) -> Option<(f64, f64)> {
        let centroids: Vec<Point<f64>> = self
            .collection
            .features
            .iter()
            .filter_map(|f| f.geometry.as_ref())
            .filter_map(|g| geo::Geometry::<f64>::try_from(g.value.clone()).ok())
            .filter_map(|g| g.centroid())
            .collect();
        MultiPoint::from(centroids)
            .centroid()
            .map(|p| (p.y(), p.x()))
    }
}

/// Step 1: one entry per feature of every row's collection.
///
/// Rows whose geometry cell is null or not an object contribute nothing. Each
/// feature gets its own copy of the row attributes.
pub fn flatten(table: &Table) -> Result<Vec<RowFeature>, PortalError> {
    let Some(geom_idx) = table.column_index(GEOMETRY_COLUMN) else {
        return Ok(Vec::new());
    };

    let mut out = Vec::new();
    for (row_no, row) in table.rows.iter().enumerate() {
        let Some(Cell::Json(Value::Object(collection))) = row.values.get(geom_idx) else {
            continue;
        };
        let features = match collection.get("features") {
            Some(Value::Array(features)) => features,
            Some(Value::Null) | None => continue,
            Some(other) => {
                return Err(PortalError::Geometry(format!(
                    "row {row_no}: features must be an array, got {other}"
                )))
            }
        };
        if features.is_empty() {
            continue;
        }

        let attrs = table.row_object(row, Some(geom_idx));
        let row_data = serde_json::to_string_pretty(&attrs)?;
        for raw in features {
            let feature = Feature::from_json_value(raw.clone())
                .map_err(|e| PortalError::Geometry(format!("row {row_no}: {e}")))?;
            out.push(RowFeature {
                feature,
                row_data: row_data.clone(),
            });
        }
    }
    Ok(out)
}

/// Converts coordinates between two proj definitions.
pub struct Reprojector {
    source: Proj,
    target: Proj,
    source_is_geographic: bool,
    target_is_geographic: bool,
}

fn is_geographic(def: &str) -> bool {
    def.split_whitespace()
        .any(|t| t == "+proj=longlat" || t == "+proj=latlong")
}

impl Reprojector {
    pub fn new(source: &str, target: &str) -> Result<Self, PortalError> {
        let parse = |def: &str| {
            Proj::from_proj_string(def)
                .map_err(|e| PortalError::Configuration(format!("invalid CRS {def:?}: {e:?}")))
        };
        Ok(Self {
            source: parse(source)?,
            target: parse(target)?,
            source_is_geographic: is_geographic(source),
            target_is_geographic: is_geographic(target),
        })
    }

    pub fn to_wgs84(source: &str) -> Result<Self, PortalError> {
        Self::new(source, WGS84)
    }

    /// Transform one `[x, y, ...]` position in place. Extra ordinates are kept.
    pub fn position(&self, pos: &mut [f64]) -> Result<(), PortalError> {
        let (x, y) = match pos {
            [x, y, ..] => (*x, *y),
            _ => {
                return Err(PortalError::Geometry(format!(
                    "position needs at least two ordinates, got {}",
                    pos.len()
                )))
            }
        };
        let mut point = if self.source_is_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        proj4rs::transform::transform(&self.source, &self.target, &mut point)
            .map_err(|e| PortalError::Geometry(format!("reprojection failed: {e:?}")))?;
        if self.target_is_geographic {
            point.0 = point.0.to_degrees();
            point.1 = point.1.to_degrees();
        }
        pos[0] = point.0;
        pos[1] = point.1;
        Ok(())
    }

    pub fn geometry(&self, geometry: &mut Geometry) -> Result<(), PortalError> {
        geometry.bbox = None;
        self.value(&mut geometry.value)
    }

    fn value(&self, value: &mut GeoValue) -> Result<(), PortalError> {
        match value {
            GeoValue::Point(p) => self.position(p),
            GeoValue::MultiPoint(ps) | GeoValue::LineString(ps) => {
                ps.iter_mut().try_for_each(|p| self.position(p))
            }
            GeoValue::MultiLineString(lines) | GeoValue::Polygon(lines) => lines
                .iter_mut()
                .flatten()
                .try_for_each(|p| self.position(p)),
            GeoValue::MultiPolygon(polys) => polys
                .iter_mut()
                .flatten()
                .flatten()
                .try_for_each(|p| self.position(p)),
            GeoValue::GeometryCollection(items) => {
                items.iter_mut().try_for_each(|g| self.geometry(g))
            }
        }
    }
}

/// Steps 1 and 2: flatten the table and reproject into one collection.
pub fn process(table: &Table, reprojector: &Reprojector) -> Result<FeatureSet, PortalError> {
    let flat = flatten(table)?;
    let mut features = Vec::with_capacity(flat.len());
    for RowFeature {
        mut feature,
        row_data,
    } in flat
    {
        if let Some(geometry) = feature.geometry.as_mut() {
            reprojector.geometry(geometry)?;
        }
        feature.bbox = None;
        feature
            .properties
            .get_or_insert_with(Default::default)
            .insert(ROW_DATA_PROPERTY.to_string(), Value::String(row_data));
        features.push(feature);
    }
    debug!(rows = table.len(), features = features.len(), "processed geometry");
    Ok(FeatureSet::from_features(features))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BRITISH_NATIONAL_GRID;
    use crate::model::{ColumnDef, Row, SqlType};
    use serde_json::json;

    fn square(x: f64, y: f64) -> Value {
        json!({
            "type": "Feature",
            "properties": {"parcel": format!("{x}-{y}")},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[x, y], [x + 10.0, y], [x + 10.0, y + 10.0], [x, y + 10.0], [x, y]]]
            }
        })
    }

    fn geom_table(cells: Vec<Cell>) -> Table {
        let rows = cells
            .into_iter()
            .enumerate()
            .map(|(i, geom)| Row {
                values: vec![Cell::Int(i as i64), Cell::Text(format!("title {i}")), geom],
            })
            .collect();
        Table::new(
            vec![
                ColumnDef {
                    name: "id".into(),
                    ty: SqlType::Int,
                },
                ColumnDef {
                    name: "title".into(),
                    ty: SqlType::Text,
                },
                ColumnDef {
                    name: GEOMETRY_COLUMN.into(),
                    ty: SqlType::Jsonb,
                },
            ],
            rows,
        )
    }

    fn collection(features: Vec<Value>) -> Cell {
        Cell::Json(json!({"type": "FeatureCollection", "features": features}))
    }

    #[test]
    fn one_entry_per_feature_with_identical_row_data() {
        let table = geom_table(vec![collection(vec![
            square(530000.0, 180000.0),
            square(530100.0, 180000.0),
            square(530200.0, 180000.0),
        ])]);

        let flat = flatten(&table).unwrap();
        assert_eq!(flat.len(), 3);
        assert!(flat.iter().all(|f| f.row_data == flat[0].row_data));

        let attrs: Value = serde_json::from_str(&flat[0].row_data).unwrap();
        assert_eq!(attrs, json!({"id": 0, "title": "title 0"}));
        assert!(flat[0].row_data.contains("\n  \"id\": 0"));
    }

    #[test]
    fn rows_without_collections_contribute_nothing() {
        let table = geom_table(vec![
            Cell::Null,
            Cell::Text("not geojson".into()),
            Cell::Json(json!({"type": "FeatureCollection"})),
            collection(vec![]),
        ]);
        assert!(flatten(&table).unwrap().is_empty());

        let no_geometry_column = Table::new(table.columns[..2].to_vec(), vec![]);
        assert!(flatten(&no_geometry_column).unwrap().is_empty());
    }

    #[test]
    fn each_row_tags_its_own_features() {
        let table = geom_table(vec![
            collection(vec![square(530000.0, 180000.0)]),
            collection(vec![square(531000.0, 181000.0), square(532000.0, 182000.0)]),
        ]);
        let flat = flatten(&table).unwrap();
        assert_eq!(flat.len(), 3);
        assert!(flat[0].row_data.contains("title 0"));
        assert!(flat[1].row_data.contains("title 1"));
        assert_eq!(flat[1].row_data, flat[2].row_data);
    }

    #[test]
    fn malformed_features_are_geometry_errors() {
        let table = geom_table(vec![collection(vec![json!({"type": "Feature", "geometry": 5})])]);
        assert!(matches!(flatten(&table), Err(PortalError::Geometry(_))));
    }

    #[test]
    fn reprojects_national_grid_to_wgs84() {
        let r = Reprojector::to_wgs84(BRITISH_NATIONAL_GRID).unwrap();
        // Charing Cross area: TQ 30 80.
        let mut pos = vec![530000.0, 180000.0];
        r.position(&mut pos).unwrap();
        let (lon, lat) = (pos[0], pos[1]);
        assert!((lat - 51.505).abs() < 0.01, "lat {lat}");
        assert!((lon - -0.128).abs() < 0.01, "lon {lon}");
    }

    #[test]
    fn short_positions_are_rejected() {
        let r = Reprojector::to_wgs84(BRITISH_NATIONAL_GRID).unwrap();
        assert!(r.position(&mut [1.0]).is_err());
    }

    #[test]
    fn process_adds_row_data_and_centers_on_features() {
        let r = Reprojector::to_wgs84(BRITISH_NATIONAL_GRID).unwrap();
        let table = geom_table(vec![collection(vec![
            square(530000.0, 180000.0),
            square(530100.0, 180100.0),
        ])]);
        let set = process(&table, &r).unwrap();
        assert_eq!(set.len(), 2);

        let props = set.collection.features[0].properties.as_ref().unwrap();
        assert!(props.contains_key("parcel"));
        assert!(props[ROW_DATA_PROPERTY].as_str().unwrap().contains("title 0"));

        let (lat, lon) = set.center().unwrap();
        assert!((lat - 51.5).abs() < 0.05, "lat {lat}");
        assert!((lon - -0.13).abs() < 0.05, "lon {lon}");
    }

    #[test]
    fn empty_set_has_no_center() {
        assert!(FeatureSet::default().center().is_none());
    }
}
