//! Music catalog lookups

use std::sync::Arc;

use async_trait::async_trait;
use chorus_agent::{Tool, ToolContext, ToolResult};
use serde_json::json;

use super::{render_rows, string_arg};
use crate::catalog::Catalog;

/// Albums by artist name
pub struct AlbumsByArtistTool {
    catalog: Arc<Catalog>,
}

impl AlbumsByArtistTool {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for AlbumsByArtistTool {
    fn name(&self) -> &str {
        "get_albums_by_artist"
    }

    fn description(&self) -> &str {
        "Get albums by an artist. Partial artist names match."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "artist": { "type": "string", "description": "Artist name or part of it" }
            },
            "required": ["artist"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> ToolResult {
        let Some(artist) = string_arg(&arguments, "artist") else {
            return ToolResult::error("Missing 'artist' argument");
        };
        render_rows(
            self.catalog.albums_by_artist(artist),
            &format!("No albums found for artist '{artist}'."),
        )
    }
}

/// Songs by artist name
pub struct TracksByArtistTool {
    catalog: Arc<Catalog>,
}

impl TracksByArtistTool {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for TracksByArtistTool {
    fn name(&self) -> &str {
        "get_tracks_by_artist"
    }

    fn description(&self) -> &str {
        "Get songs by an artist (or similar artists)."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "artist": { "type": "string", "description": "Artist name or part of it" }
            },
            "required": ["artist"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> ToolResult {
        let Some(artist) = string_arg(&arguments, "artist") else {
            return ToolResult::error("Missing 'artist' argument");
        };
        render_rows(
            self.catalog.tracks_by_artist(artist),
            &format!("No songs found for artist '{artist}'."),
        )
    }
}

/// A handful of songs from a genre
pub struct SongsByGenreTool {
    catalog: Arc<Catalog>,
}

impl SongsByGenreTool {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for SongsByGenreTool {
    fn name(&self) -> &str {
        "get_songs_by_genre"
    }

    fn description(&self) -> &str {
        "Recommend up to eight songs from a genre, each by a different artist."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "genre": { "type": "string", "description": "Genre name, e.g. Rock or Jazz" }
            },
            "required": ["genre"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> ToolResult {
        let Some(genre) = string_arg(&arguments, "genre") else {
            return ToolResult::error("Missing 'genre' argument");
        };
        render_rows(
            self.catalog.songs_by_genre(genre),
            &format!("No songs found for the genre: {genre}"),
        )
    }
}

/// Whether a song exists, by title
pub struct CheckForSongsTool {
    catalog: Arc<Catalog>,
}

impl CheckForSongsTool {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for CheckForSongsTool {
    fn name(&self) -> &str {
        "check_for_songs"
    }

    fn description(&self) -> &str {
        "Check whether a song exists in the catalog by its title."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "song_title": { "type": "string", "description": "Song title or part of it" }
            },
            "required": ["song_title"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> ToolResult {
        let Some(title) = string_arg(&arguments, "song_title") else {
            return ToolResult::error("Missing 'song_title' argument");
        };
        render_rows(
            self.catalog.songs_by_title(title),
            &format!("No songs titled '{title}' in the catalog."),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixture;

    fn catalog() -> Arc<Catalog> {
        Arc::new(fixture::catalog())
    }

    #[tokio::test]
    async fn test_albums_by_artist() {
        let tool = AlbumsByArtistTool::new(catalog());
        let result = tool
            .execute(json!({"artist": "AC/DC"}), &ToolContext::default())
            .await;
        assert!(!result.is_error);
        let rows: serde_json::Value = serde_json::from_str(&result.text_content()).unwrap();
        assert_eq!(rows.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_no_results_is_not_an_error() {
        let tool = TracksByArtistTool::new(catalog());
        let result = tool
            .execute(json!({"artist": "Nobody"}), &ToolContext::default())
            .await;
        assert!(!result.is_error);
        assert!(result.text_content().starts_with("No songs found"));
    }

    #[tokio::test]
    async fn test_songs_by_genre() {
        let tool = SongsByGenreTool::new(catalog());
        let result = tool
            .execute(json!({"genre": "Jazz"}), &ToolContext::default())
            .await;
        let rows: Vec<serde_json::Value> = serde_json::from_str(&result.text_content()).unwrap();
        assert_eq!(rows.len(), 2);

        let missing = tool
            .execute(json!({"genre": "Polka"}), &ToolContext::default())
            .await;
        assert_eq!(missing.text_content(), "No songs found for the genre: Polka");
    }

    #[tokio::test]
    async fn test_check_for_songs() {
        let tool = CheckForSongsTool::new(catalog());
        let result = tool
            .execute(json!({"song_title": "So What"}), &ToolContext::default())
            .await;
        assert!(result.text_content().contains("\"TrackId\":4"));
    }

    #[tokio::test]
    async fn test_missing_argument() {
        let tool = CheckForSongsTool::new(catalog());
        let result = tool.execute(json!({}), &ToolContext::default()).await;
        assert!(result.is_error);
    }
}
