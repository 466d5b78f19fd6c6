pub const MAP_PAGE: &str = page!(
    "Map",
    r#"<link rel="stylesheet" href="https://cdnjs.cloudflare.com/ajax/libs/leaflet/1.9.4/leaflet.css" crossorigin="anonymous" />
  <script src="https://cdnjs.cloudflare.com/ajax/libs/leaflet/1.9.4/leaflet.js" crossorigin="anonymous"></script>
  <style>
    #map { height: 60vh; margin-bottom: 1rem; border: 1px solid #d1d5db; }
    .row-tooltip pre { margin: 0; font-size: 0.8rem; }
  </style>
"#,
    r#"<h1>Map</h1>
    <div class="toolbar"><button id="refresh">Refresh data</button></div>
    <div id="message" hidden></div>
    <div id="map"></div>
    <p>Tick rows to highlight their features.</p>
    <div id="grid"></div>
    <script>
      const message = document.getElementById("message");
      const grid = document.getElementById("grid");
      const map = L.map("map");
      L.tileLayer("https://{s}.basemaps.cartocdn.com/light_all/{z}/{x}/{y}{r}.png", {
        attribution: "&copy; OpenStreetMap contributors &copy; CARTO",
        maxZoom: 20,
      }).addTo(map);
      const drawn = L.featureGroup().addTo(map);
      let fingerprint = null;

      const rgba = (c) => `rgba(${c[0]}, ${c[1]}, ${c[2]}, ${c[3] / 255})`;
      const escapeHtml = (s) =>
        String(s).replace(/[&<>"']/g, (ch) => ({ "&": "&amp;", "<": "&lt;", ">": "&gt;", '"': "&quot;", "'": "&#39;" })[ch]);

      function drawLayers(view) {
        drawn.clearLayers();
        if (!view) return;
        const tip = view.tooltip;
        for (const layer of view.layers) {
          L.geoJSON(layer.data, {
            style: () => ({
              stroke: layer.stroked,
              color: rgba(layer.line_color),
              opacity: layer.line_color[3] / 255,
              weight: layer.line_width_min_pixels,
              fill: layer.filled,
              fillColor: rgba(layer.fill_color),
              fillOpacity: layer.fill_color[3] / 255,
            }),
            pointToLayer: (_f, latlng) => L.circleMarker(latlng, { radius: 6 }),
            onEachFeature: (feature, l) => {
              if (!layer.pickable) return;
              const data = (feature.properties || {}).row_data || "";
              l.bindTooltip(tip.html.replace("{row_data}", escapeHtml(data)), { className: "row-tooltip" });
              l.on("tooltipopen", (e) => {
                const el = e.tooltip.getElement();
                el.style.backgroundColor = tip.background_color;
                el.style.color = tip.color;
              });
            },
          }).addTo(drawn);
        }
        map.setView([view.view_state.latitude, view.view_state.longitude], view.view_state.zoom);
      }

      function selectionBox(i, tr) {
        const box = document.createElement("input");
        box.type = "checkbox";
        box.dataset.row = i;
        box.onchange = () => {
          tr.classList.toggle("selected", box.checked);
          sendSelection();
        };
        return box;
      }

      function render(view) {
        fingerprint = view.fingerprint;
        if (view.error) showMessage(message, "error", view.error);
        else showMessage(message, "warning", view.warning);
        drawLayers(view.map);
        if (!view.table) {
          grid.replaceChildren();
          return;
        }
        const shown = {
          columns: view.table.columns.filter((c) => c.name !== "geometry"),
          rows: [],
        };
        const geomIdx = view.table.columns.findIndex((c) => c.name === "geometry");
        shown.rows = view.table.rows.map((r) => r.filter((_v, i) => i !== geomIdx));
        renderGrid(shown, grid, { rowControl: selectionBox });
        for (const i of view.selected_rows) {
          const box = grid.querySelector(`input[data-row="${i}"]`);
          if (box) {
            box.checked = true;
            box.closest("tr").classList.add("selected");
          }
        }
      }

      async function post(url, body) {
        const res = await fetch(url, {
          method: "POST",
          headers: { "content-type": "application/json" },
          body: body === undefined ? undefined : JSON.stringify(body),
        });
        render(await res.json());
      }

      function sendSelection() {
        const rows = Array.from(grid.querySelectorAll("input[type=checkbox]:checked")).map((b) => Number(b.dataset.row));
        post("/api/map/selection", { rows, fingerprint });
      }

      document.getElementById("refresh").onclick = () => post("/api/map/refresh");
      fetch("/api/map").then((r) => r.json()).then(render);
    </script>"#
);
