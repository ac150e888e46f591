//! Music store catalog backed by SQLite (Chinook schema)

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use thiserror::Error;

/// Public copy of the Chinook SQLite script
pub const CHINOOK_SQL_URL: &str =
    "https://raw.githubusercontent.com/lerocha/chinook-database/master/ChinookDatabase/DataSources/Chinook_Sqlite.sql";

/// Upper bound on genre recommendations
const GENRE_SONG_LIMIT: usize = 8;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog not found at {0}")]
    NotFound(PathBuf),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download failed: {0}")]
    Download(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// A result row as a JSON object keyed by column name
pub type Row = serde_json::Map<String, serde_json::Value>;

pub struct Catalog {
    conn: Mutex<Connection>,
}

impl Catalog {
    /// Open a catalog.
    ///
    /// A `.sql` path is treated as a script and loaded into an in-memory
    /// database; anything else is opened as an SQLite database file.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CatalogError::NotFound(path.to_path_buf()));
        }
        let conn = if path.extension().and_then(|e| e.to_str()) == Some("sql") {
            let script = fs::read_to_string(path)?;
            let conn = Connection::open_in_memory()?;
            conn.execute_batch(&script)?;
            conn
        } else {
            Connection::open(path)?
        };
        tracing::debug!(path = %path.display(), "Catalog opened");
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Default script location: `<data_local_dir>/chorus/Chinook_Sqlite.sql`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_local_dir().map(|d| d.join("chorus").join("Chinook_Sqlite.sql"))
    }

    /// Download the Chinook script to `dest`
    pub async fn download(dest: &Path) -> Result<()> {
        let script = reqwest::get(CHINOOK_SQL_URL)
            .await?
            .error_for_status()?
            .text()
            .await?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, script)?;
        Ok(())
    }

    fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Row>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let rows = stmt.query_map(params, |row| {
            let mut out = Row::new();
            for (i, name) in columns.iter().enumerate() {
                out.insert(name.clone(), value_to_json(row.get_ref(i)?));
            }
            Ok(out)
        })?;
        let rows = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn albums_by_artist(&self, artist: &str) -> Result<Vec<Row>> {
        self.query(
            "SELECT Album.Title, Artist.Name
             FROM Album
             JOIN Artist ON Album.ArtistId = Artist.ArtistId
             WHERE Artist.Name LIKE ?1",
            params![like(artist)],
        )
    }

    pub fn tracks_by_artist(&self, artist: &str) -> Result<Vec<Row>> {
        self.query(
            "SELECT Track.Name AS SongName, Artist.Name AS ArtistName
             FROM Album
             LEFT JOIN Artist ON Album.ArtistId = Artist.ArtistId
             LEFT JOIN Track ON Track.AlbumId = Album.AlbumId
             WHERE Artist.Name LIKE ?1",
            params![like(artist)],
        )
    }

    /// Up to eight songs of a genre, one per artist
    pub fn songs_by_genre(&self, genre: &str) -> Result<Vec<Row>> {
        let genre_ids: Vec<i64> = self
            .query("SELECT GenreId FROM Genre WHERE Name LIKE ?1", params![like(genre)])?
            .iter()
            .filter_map(|row| row.get("GenreId").and_then(|v| v.as_i64()))
            .collect();
        if genre_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; genre_ids.len()].join(", ");
        let sql = format!(
            "SELECT Track.Name AS SongName, Artist.Name AS ArtistName
             FROM Track
             LEFT JOIN Album ON Track.AlbumId = Album.AlbumId
             LEFT JOIN Artist ON Album.ArtistId = Artist.ArtistId
             WHERE Track.GenreId IN ({placeholders})
             GROUP BY Artist.Name
             LIMIT {GENRE_SONG_LIMIT}"
        );
        self.query(&sql, params_from_iter(genre_ids.iter()))
    }

    pub fn songs_by_title(&self, title: &str) -> Result<Vec<Row>> {
        self.query("SELECT * FROM Track WHERE Name LIKE ?1", params![like(title)])
    }

    pub fn invoices_by_date(&self, customer_id: i64) -> Result<Vec<Row>> {
        self.query(
            "SELECT * FROM Invoice WHERE CustomerId = ?1 ORDER BY InvoiceDate DESC",
            params![customer_id],
        )
    }

    pub fn invoices_by_unit_price(&self, customer_id: i64) -> Result<Vec<Row>> {
        self.query(
            "SELECT Invoice.*, InvoiceLine.UnitPrice
             FROM Invoice
             JOIN InvoiceLine ON Invoice.InvoiceId = InvoiceLine.InvoiceId
             WHERE Invoice.CustomerId = ?1
             ORDER BY InvoiceLine.UnitPrice DESC",
            params![customer_id],
        )
    }

    /// Support representative for one of the customer's invoices
    pub fn employee_for_invoice(&self, invoice_id: i64, customer_id: i64) -> Result<Vec<Row>> {
        self.query(
            "SELECT Employee.FirstName, Employee.Title, Employee.Email
             FROM Employee
             JOIN Customer ON Customer.SupportRepId = Employee.EmployeeId
             JOIN Invoice ON Invoice.CustomerId = Customer.CustomerId
             WHERE Invoice.InvoiceId = ?1 AND Invoice.CustomerId = ?2",
            params![invoice_id, customer_id],
        )
    }

    fn customer_id_where(&self, clause: &str, value: &dyn rusqlite::ToSql) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT CustomerId FROM Customer WHERE {clause} LIMIT 1");
        Ok(conn
            .query_row(&sql, [value], |row| row.get(0))
            .optional()?)
    }

    pub fn customer_exists(&self, customer_id: i64) -> Result<bool> {
        Ok(self
            .customer_id_where("CustomerId = ?1", &customer_id)?
            .is_some())
    }

    pub fn customer_by_phone(&self, phone: &str) -> Result<Option<i64>> {
        self.customer_id_where("Phone = ?1", &phone)
    }

    pub fn customer_by_email(&self, email: &str) -> Result<Option<i64>> {
        self.customer_id_where("lower(Email) = lower(?1)", &email)
    }
}

fn like(term: &str) -> String {
    format!("%{}%", term.trim())
}

fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => i.into(),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned().into(),
        ValueRef::Blob(bytes) => format!("<{} bytes>", bytes.len()).into(),
    }
}


#[cfg(test)]
mod tests {
    use super::fixture::catalog;
    use super::*;

    #[test]
    fn test_albums_by_artist_partial_match() {
        let rows = catalog().albums_by_artist("ac/dc").unwrap();
        let titles: Vec<_> = rows.iter().map(|r| r["Title"].as_str().unwrap()).collect();
        assert_eq!(titles, vec!["For Those About To Rock We Salute You", "Let There Be Rock"]);
    }

    #[test]
    fn test_tracks_by_artist() {
        let rows = catalog().tracks_by_artist("Accept").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["SongName"], "Fast As a Shark");
        assert_eq!(rows[0]["ArtistName"], "Accept");
    }

    #[test]
    fn test_songs_by_genre_one_per_artist() {
        let rows = catalog().songs_by_genre("rock").unwrap();
        let mut artists: Vec<_> = rows.iter().map(|r| r["ArtistName"].as_str().unwrap()).collect();
        artists.sort();
        assert_eq!(artists, vec!["AC/DC", "Accept"]);
        assert!(catalog().songs_by_genre("polka").unwrap().is_empty());
    }

    #[test]
    fn test_songs_by_title() {
        let rows = catalog().songs_by_title("shark").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["TrackId"], 3);
        assert!((rows[0]["UnitPrice"].as_f64().unwrap() - 0.99).abs() < 1e-9);
    }

    #[test]
    fn test_invoices_are_scoped_and_sorted() {
        let cat = catalog();
        let by_date = cat.invoices_by_date(1).unwrap();
        let ids: Vec<_> = by_date.iter().map(|r| r["InvoiceId"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![121, 98]);

        let by_price = cat.invoices_by_unit_price(1).unwrap();
        assert_eq!(by_price[0]["UnitPrice"].as_f64(), Some(1.99));
        assert!(by_price.iter().all(|r| r["CustomerId"] == 1));
    }

    #[test]
    fn test_employee_requires_matching_customer() {
        let cat = catalog();
        let rep = cat.employee_for_invoice(98, 1).unwrap();
        assert_eq!(rep[0]["FirstName"], "Jane");
        assert!(cat.employee_for_invoice(98, 10).unwrap().is_empty());
    }

    #[test]
    fn test_customer_lookups() {
        let cat = catalog();
        assert!(cat.customer_exists(10).unwrap());
        assert!(!cat.customer_exists(11).unwrap());
        assert_eq!(cat.customer_by_phone("+55 (12) 3923-5555").unwrap(), Some(1));
        assert_eq!(cat.customer_by_email("LUISG@embraer.com.br").unwrap(), Some(1));
        assert_eq!(cat.customer_by_email("nobody@example.com").unwrap(), None);
    }

    #[test]
    fn test_open_sql_script_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("chinook.sql");
        fs::write(&script, fixture::sql()).unwrap();
        let cat = Catalog::open(&script).unwrap();
        assert!(cat.customer_exists(1).unwrap());

        let missing = Catalog::open(&dir.path().join("nope.db"));
        assert!(matches!(missing, Err(CatalogError::NotFound(_))));
    }
}
