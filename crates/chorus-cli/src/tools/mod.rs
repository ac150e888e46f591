//! Catalog tools for the support sub-agents

mod invoice;
mod music;

use std::sync::Arc;

use chorus_agent::{BoxedTool, ToolResult};

use crate::catalog::{Catalog, CatalogError, Row};

pub use invoice::{EmployeeByInvoiceTool, InvoicesByDateTool, InvoicesByUnitPriceTool};
pub use music::{AlbumsByArtistTool, CheckForSongsTool, SongsByGenreTool, TracksByArtistTool};

/// Tools for the music catalog sub-agent
pub fn music_tools(catalog: &Arc<Catalog>) -> Vec<BoxedTool> {
    vec![
        Arc::new(AlbumsByArtistTool::new(Arc::clone(catalog))),
        Arc::new(TracksByArtistTool::new(Arc::clone(catalog))),
        Arc::new(SongsByGenreTool::new(Arc::clone(catalog))),
        Arc::new(CheckForSongsTool::new(Arc::clone(catalog))),
    ]
}

/// Tools for the invoice sub-agent
pub fn invoice_tools(catalog: &Arc<Catalog>) -> Vec<BoxedTool> {
    vec![
        Arc::new(InvoicesByDateTool::new(Arc::clone(catalog))),
        Arc::new(InvoicesByUnitPriceTool::new(Arc::clone(catalog))),
        Arc::new(EmployeeByInvoiceTool::new(Arc::clone(catalog))),
    ]
}

/// Turn a query result into what the model sees
fn render_rows(result: Result<Vec<Row>, CatalogError>, empty: &str) -> ToolResult {
    match result {
        Ok(rows) if rows.is_empty() => ToolResult::text(empty),
        Ok(rows) => ToolResult::json(&rows),
        Err(e) => {
            tracing::warn!("Catalog query failed: {}", e);
            ToolResult::error(format!("Catalog query failed: {e}"))
        }
    }
}

fn string_arg<'a>(arguments: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixture;

    #[test]
    fn test_tool_sets() {
        let catalog = Arc::new(fixture::catalog());
        let music: Vec<_> = music_tools(&catalog).iter().map(|t| t.name().to_string()).collect();
        assert_eq!(
            music,
            vec!["get_albums_by_artist", "get_tracks_by_artist", "get_songs_by_genre", "check_for_songs"]
        );
        let invoice: Vec<_> = invoice_tools(&catalog).iter().map(|t| t.name().to_string()).collect();
        assert_eq!(
            invoice,
            vec![
                "get_invoices_by_customer_sorted_by_date",
                "get_invoices_sorted_by_unit_price",
                "get_employee_by_invoice_and_customer"
            ]
        );
    }

    #[test]
    fn test_schemas_are_objects_with_required_fields() {
        let catalog = Arc::new(fixture::catalog());
        for tool in music_tools(&catalog).into_iter().chain(invoice_tools(&catalog)) {
            let schema = tool.parameters();
            assert_eq!(schema["type"], "object", "{}", tool.name());
            let properties = schema["properties"].as_object().unwrap();
            for required in schema["required"].as_array().into_iter().flatten() {
                assert!(properties.contains_key(required.as_str().unwrap()));
            }
        }
    }

    #[test]
    fn test_render_rows() {
        assert_eq!(render_rows(Ok(vec![]), "none").text_content(), "none");
        let err = render_rows(
            Err(CatalogError::NotFound("x".into())),
            "none",
        );
        assert!(err.is_error);
    }

    #[test]
    fn test_string_arg() {
        let args = serde_json::json!({"artist": "  U2 ", "blank": "  ", "n": 3});
        assert_eq!(string_arg(&args, "artist"), Some("U2"));
        assert_eq!(string_arg(&args, "blank"), None);
        assert_eq!(string_arg(&args, "n"), None);
        assert_eq!(string_arg(&args, "missing"), None);
    }
}
