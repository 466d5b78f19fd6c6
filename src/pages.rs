//! The three data pages as request handlers over shared state.
//!
//! Every operation returns a view. Failures are folded into the view as an
//! inline message so that one page going wrong never affects another.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{GeometryCache, QueryCache};
use crate::config::PortalConfig;
use crate::error::PortalError;
use crate::geometry::{self, FeatureSet, Reprojector, GEOMETRY_COLUMN};
use crate::map::{build_map_view, MapView};
use crate::model::{Cell, ColumnDef, Row, Table};
use crate::session::Sessions;
use crate::store::TableSource;

pub const SAVED_MESSAGE: &str = "Changes saved successfully!";
pub const NO_MAP_DATA: &str = "No data available or geometry column missing.";
pub const NO_GEOMETRY: &str = "Could not process geometry data.";

#[derive(Debug, Serialize)]
pub struct TableView {
    pub table: Option<Arc<Table>>,
    /// Seconds since the shown data was fetched.
    pub age_secs: Option<u64>,
    pub error: Option<String>,
}

/// Rows as currently shown in the editable grid.
#[derive(Debug, Clone, Deserialize)]
pub struct GridSubmission {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
pub struct SaveOutcome {
    pub saved: bool,
    pub message: String,
    /// The table as stored after a successful save.
    pub table: Option<Arc<Table>>,
}

impl SaveOutcome {
    fn failed(e: PortalError) -> Self {
        warn!(error = %e, "save failed");
        Self {
            saved: false,
            message: e.to_string(),
            table: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectionRequest {
    /// Row positions in the displayed table. Empty clears the selection.
    pub rows: Vec<usize>,
    /// Fingerprint of the table the rows were picked from, as returned in
    /// [`MapPageView::fingerprint`]. Defaults to the current table.
    #[serde(default)]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct MapPageView {
    pub table: Option<Arc<Table>>,
    /// Decimal string so browsers keep all 64 bits.
    pub fingerprint: Option<String>,
    pub selected_rows: Vec<usize>,
    pub map: Option<MapView>,
    pub warning: Option<String>,
    pub error: Option<String>,
}

pub struct Portal {
    source: Arc<dyn TableSource>,
    config: PortalConfig,
    queries: QueryCache,
    geometry: GeometryCache,
    reprojector: Reprojector,
    sessions: Sessions,
}

impl Portal {
    pub fn new(
        source: Arc<dyn TableSource>,
        config: PortalConfig,
        reprojector: Reprojector,
    ) -> Self {
        let ttl = Some(config.cache_ttl);
        Self {
            source,
            config,
            queries: QueryCache::new("query", ttl),
            geometry: GeometryCache::new("geometry", None),
            reprojector,
            sessions: Sessions::default(),
        }
    }

    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    async fn query(&self, sql: &str) -> Result<Arc<Table>, PortalError> {
        self.queries
            .get_or_try_load(sql.to_string(), || self.source.fetch(sql))
            .await
    }

    async fn table_page(&self, page: &str, sql: &str) -> TableView {
        match self.query(sql).await {
            Ok(table) => TableView {
                table: Some(table),
                age_secs: self
                    .queries
                    .created_at(&sql.to_string())
                    .map(|at| at.elapsed().as_secs()),
                error: None,
            },
            Err(e) => {
                warn!(page, error = %e, "page query failed");
                TableView {
                    table: None,
                    age_secs: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn table_view(&self) -> TableView {
        self.table_page("table", &self.config.table_query).await
    }

    pub async fn refresh_table(&self) -> TableView {
        self.queries.clear();
        self.table_view().await
    }

    pub async fn editor_view(&self) -> TableView {
        self.table_page("editor", &self.config.editor_query()).await
    }

    /// Replace the target table with the submitted grid.
    pub async fn save_editor(&self, submission: GridSubmission) -> SaveOutcome {
        let current = match self.query(&self.config.editor_query()).await {
            Ok(table) => table,
            Err(e) => return SaveOutcome::failed(e),
        };
        if !current.unreadable.is_empty() {
            return SaveOutcome::failed(PortalError::Save(format!(
                "columns {} could not be read and would be overwritten with nulls",
                current.unreadable.join(", ")
            )));
        }
        let table = match grid_to_table(&current, submission) {
            Ok(table) => table,
            Err(e) => return SaveOutcome::failed(e),
        };

        let target = &self.config.target_table;
        match self.source.replace_all(target, &table).await {
            Ok(inserted) => info!(%target, inserted, "table replaced"),
            Err(e) => return SaveOutcome::failed(e),
        }

        self.queries.clear();
        let view = self.editor_view().await;
        SaveOutcome {
            saved: true,
            message: SAVED_MESSAGE.to_string(),
            table: view.table,
        }
    }

    async fn features(&self, table: &Table) -> Arc<FeatureSet> {
        let fingerprint = table.fingerprint();
        self.geometry
            .get_or_try_load(fingerprint, || async {
                geometry::process(table, &self.reprojector)
            })
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "geometry processing failed");
                Arc::new(FeatureSet::default())
            })
    }

    pub async fn map_view(&self, session_id: &str) -> MapPageView {
        let table = match self.query(&self.config.map_query).await {
            Ok(table) => table,
            Err(e) => {
                warn!(page = "map", error = %e, "page query failed");
                return MapPageView {
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        };
        let fingerprint = table.fingerprint();
        let mut view = MapPageView {
            fingerprint: Some(fingerprint.to_string()),
            ..Default::default()
        };

        if table.is_empty() || !table.has_column(GEOMETRY_COLUMN) {
            view.warning = Some(NO_MAP_DATA.to_string());
            view.table = Some(table);
            return view;
        }

        let all = self.features(&table).await;
        if all.is_empty() {
            view.warning = Some(NO_GEOMETRY.to_string());
            view.table = Some(table);
            return view;
        }

        let selected = self
            .sessions
            .with(session_id, |s| s.selection_for(fingerprint, table.len()));
        let highlight = if selected.is_empty() {
            None
        } else {
            Some(self.features(&table.select_rows(&selected)).await)
        };

        debug!(
            features = all.len(),
            selected = selected.len(),
            "rendering map"
        );
        view.map = build_map_view(&all, !selected.is_empty(), highlight.as_deref());
        if view.map.is_none() {
            view.warning = Some(NO_GEOMETRY.to_string());
        }
        view.selected_rows = selected;
        view.table = Some(table);
        view
    }

    pub async fn select_rows(&self, session_id: &str, request: SelectionRequest) -> MapPageView {
        let fingerprint = match request.fingerprint.as_deref().map(str::parse::<u64>) {
            Some(Ok(fp)) => fp,
            Some(Err(_)) => {
                warn!("ignoring selection with malformed fingerprint");
                self.sessions.with(session_id, |s| s.clear_selection());
                return self.map_view(session_id).await;
            }
            None => match self.query(&self.config.map_query).await {
                Ok(table) => table.fingerprint(),
                Err(_) => return self.map_view(session_id).await,
            },
        };
        self.sessions
            .with(session_id, |s| s.select(request.rows, fingerprint));
        self.map_view(session_id).await
    }

    pub async fn refresh_map(&self, session_id: &str) -> MapPageView {
        self.queries.clear();
        self.geometry.clear();
        self.sessions.with(session_id, |s| s.clear_selection());
        self.map_view(session_id).await
    }
}

/// Convert grid values into a table typed like `current`.
///
/// Submitted columns must be known and distinct, and every row must have one
/// value per column. Columns left out of the grid take their defaults.
fn grid_to_table(current: &Table, submission: GridSubmission) -> Result<Table, PortalError> {
    let mut seen = HashSet::new();
    let columns = submission
        .columns
        .iter()
        .map(|name| {
            if !seen.insert(name.as_str()) {
                return Err(PortalError::Invalid(format!("duplicate column {name:?}")));
            }
            current
                .columns
                .iter()
                .find(|c| &c.name == name)
                .cloned()
                .ok_or_else(|| PortalError::Invalid(format!("unknown column {name:?}")))
        })
        .collect::<Result<Vec<ColumnDef>, _>>()?;

    let rows = submission
        .rows
        .iter()
        .enumerate()
        .map(|(n, values)| {
            if values.len() != columns.len() {
                return Err(PortalError::Invalid(format!(
                    "row {n} has {} values, expected {}",
                    values.len(),
                    columns.len()
                )));
            }
            let values = values
                .iter()
                .zip(&columns)
                .map(|(value, col)| {
                    Cell::from_json(value, &col.ty).map_err(|e| {
                        PortalError::Invalid(format!("row {n}, column {:?}: {e}", col.name))
                    })
                })
                .collect::<Result<Vec<Cell>, _>>()?;
            Ok(Row { values })
        })
        .collect::<Result<Vec<Row>, _>>()?;

    Ok(Table::new(columns, rows))
}
