//! Embedded page assets.
//!
//! Every page shares one navigation shell and talks to the JSON routes under
//! `/api`. Assets are `&'static str` so the binary serves them without
//! filesystem lookups.

/// Wrap a page body in the shared shell. Arguments must be literals.
macro_rules! page {
    ($title:literal, $head:literal, $body:literal) => {
        concat!(
            r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>"#,
            $title,
            r#" · Data Portal</title>
  <style>
    body { margin: 0; font-family: system-ui, sans-serif; color: #1f2937; }
    nav { display: flex; gap: 1.5rem; padding: 0.75rem 1.5rem; background: #1e3a5f; }
    nav a { color: #e5e7eb; text-decoration: none; font-weight: 600; }
    nav a:hover { color: #fff; }
    main { padding: 1.5rem; }
    table.grid { border-collapse: collapse; font-size: 0.9rem; }
    table.grid th, table.grid td { border: 1px solid #d1d5db; padding: 0.3rem 0.6rem; text-align: left; }
    table.grid th { background: #f3f4f6; }
    table.grid tr.selected td { background: #fef3c7; }
    table.grid td[data-null] { background: #f9fafb; }
    .error { color: #b91c1c; background: #fee2e2; padding: 0.6rem 1rem; border-radius: 4px; }
    .warning { color: #92400e; background: #fef3c7; padding: 0.6rem 1rem; border-radius: 4px; }
    .success { color: #166534; background: #dcfce7; padding: 0.6rem 1rem; border-radius: 4px; }
    .toolbar { margin: 0 0 1rem; display: flex; gap: 0.5rem; }
    [hidden] { display: none !important; }
  </style>
  <script>
    function isJson(column) {
      return column.type === "json" || column.type === "jsonb";
    }
    function cellText(v, column) {
      if (v === null || v === undefined) return "";
      if (typeof v === "object" || (column && isJson(column))) return JSON.stringify(v);
      return String(v);
    }
    // An untouched cell that held NULL keeps data-null; any edit drops it.
    function makeEditable(td, isNull) {
      td.contentEditable = "true";
      if (isNull) td.dataset.null = "";
      td.addEventListener("input", () => { delete td.dataset.null; });
    }
    function renderGrid(table, target, opts) {
      opts = opts || {};
      const el = document.createElement("table");
      el.className = "grid";
      const head = el.createTHead().insertRow();
      if (opts.rowControl) head.appendChild(document.createElement("th"));
      for (const c of table.columns) {
        const th = document.createElement("th");
        th.textContent = c.name;
        th.title = c.type;
        head.appendChild(th);
      }
      const body = el.createTBody();
      table.rows.forEach((row, i) => {
        const tr = body.insertRow();
        if (opts.rowControl) tr.insertCell().appendChild(opts.rowControl(i, tr));
        row.forEach((v, j) => {
          const td = tr.insertCell();
          td.textContent = cellText(v, table.columns[j]);
          if (opts.editable) makeEditable(td, v === null);
        });
      });
      target.replaceChildren(el);
      return el;
    }
    function showMessage(el, kind, text) {
      el.className = kind;
      el.textContent = text || "";
      el.hidden = !text;
    }
  </script>
"#,
            $head,
            r#"</head>
<body>
  <nav>
    <a href="/">Home</a>
    <a href="/table">Table</a>
    <a href="/editor">Editor</a>
    <a href="/map">Map</a>
  </nav>
  <main>
"#,
            $body,
            r#"
  </main>
</body>
</html>
"#
        )
    };
}

mod map;

pub use map::MAP_PAGE;

pub const WELCOME_PAGE: &str = page!(
    "Welcome",
    "",
    r#"<h1>Data Portal</h1>
    <p>Browse, edit and map tables from the configured PostgreSQL database.</p>
    <ul>
      <li><a href="/table">Table</a>: read-only view of the table query.</li>
      <li><a href="/editor">Editor</a>: edit rows and save them back. Saving replaces the whole table.</li>
      <li><a href="/map">Map</a>: features from the geometry query, with row highlighting.</li>
    </ul>"#
);

pub const TABLE_PAGE: &str = page!(
    "Table",
    "",
    r#"<h1>Table</h1>
    <div class="toolbar"><button id="refresh">Refresh data</button> <small id="age"></small></div>
    <div id="message" hidden></div>
    <div id="grid"></div>
    <script>
      const grid = document.getElementById("grid");
      const message = document.getElementById("message");
      function render(view) {
        document.getElementById("age").textContent =
          view.age_secs == null ? "" : `fetched ${view.age_secs}s ago`;
        if (view.error) {
          showMessage(message, "error", view.error);
          grid.replaceChildren();
          return;
        }
        showMessage(message, "", "");
        renderGrid(view.table, grid);
      }
      async function load(url, method) {
        const res = await fetch(url, { method: method || "GET" });
        render(await res.json());
      }
      document.getElementById("refresh").onclick = () => load("/api/table/refresh", "POST");
      load("/api/table");
    </script>"#
);

pub const EDITOR_PAGE: &str = page!(
    "Editor",
    "",
    r#"<h1>Editor</h1>
    <div class="toolbar">
      <button id="add">Add row</button>
      <button id="save">Save changes</button>
    </div>
    <div id="message" hidden></div>
    <div id="grid"></div>
    <script>
      const grid = document.getElementById("grid");
      const message = document.getElementById("message");
      let columns = [];

      function deleteButton(_i, tr) {
        const b = document.createElement("button");
        b.textContent = "✕";
        b.title = "Delete row";
        b.onclick = () => tr.remove();
        return b;
      }
      function render(table) {
        columns = table.columns;
        renderGrid(table, grid, { editable: true, rowControl: deleteButton });
      }
      function readCell(td, column) {
        if ("null" in td.dataset) return null;
        const text = td.textContent;
        if (isJson(column)) {
          if (text.trim() === "") return null;
          try { return JSON.parse(text); } catch (_) { return text; }
        }
        return text;
      }
      function collect() {
        const rows = [];
        for (const tr of grid.querySelectorAll("tbody tr")) {
          const cells = Array.from(tr.cells).slice(1);
          rows.push(cells.map((td, i) => readCell(td, columns[i])));
        }
        return { columns: columns.map((c) => c.name), rows };
      }
      document.getElementById("add").onclick = () => {
        const body = grid.querySelector("tbody");
        if (!body) return;
        const tr = body.insertRow();
        tr.insertCell().appendChild(deleteButton(0, tr));
        for (const _c of columns) makeEditable(tr.insertCell(), true);
      };
      document.getElementById("save").onclick = async () => {
        const res = await fetch("/api/editor/save", {
          method: "POST",
          headers: { "content-type": "application/json" },
          body: JSON.stringify(collect()),
        });
        const outcome = await res.json();
        if (!res.ok) {
          showMessage(message, "error", outcome.message);
        } else if (outcome.saved) {
          showMessage(message, "success", outcome.message);
          render(outcome.table);
        } else {
          // Unsaved edits stay in the grid.
          showMessage(message, "error", outcome.message);
        }
      };
      fetch("/api/editor").then((r) => r.json()).then((view) => {
        if (view.error) showMessage(message, "error", view.error);
        else render(view.table);
      });
    </script>"#
);
