//! `GET /$status` (§4.2 `snapshot`, §6): a minimal HTML page listing
//! active tunnels, grounded on the teacher's `api.rs::list_agents` JSON
//! endpoint but rendered for human operators per the spec's reserved
//! status path.

use axum::extract::State;
use axum::response::Html;

use crate::state::AppState;

pub async fn status_page(State(state): State<AppState>) -> Html<String> {
    let tunnels = state.registry.snapshot();
    let mut rows = String::new();
    for t in &tunnels {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            html_escape(&t.id),
            t.kind_label,
            t.request_count,
            t.active_streams
        ));
    }
    let body = format!(
        "<!doctype html><html><head><title>pgrok status</title></head><body>\
         <h1>pgrok relay</h1>\
         <p>{} tunnel(s) active{}</p>\
         <table border=\"1\" cellpadding=\"4\">\
         <tr><th>id</th><th>kind</th><th>requests</th><th>tcp streams</th></tr>\
         {}\
         </table></body></html>",
        tunnels.len(),
        if state.registry.is_single_tunnel() { " (single-tunnel mode)" } else { "" },
        rows
    );
    Html(body)
}

fn html_escape(input: &str) -> String {
    input.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
