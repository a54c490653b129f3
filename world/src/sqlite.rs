//! SQLite persistence for tiles and users.

use std::{path::Path, sync::Mutex, time::Duration};

use hexfront_core::{AxialBounds, Coord, Credential, Tile, User, Username};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{lock, Backend, PendingBatch, StoreError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const TILE_COLUMNS: &str = "q, r, owner, population, has_bonus, is_disconnected";
const USER_COLUMNS: &str = "username, credential, capital_q, capital_r, explored_tiles";

/// Backend storing the sparse tile map and user table in SQLite.
#[derive(Debug)]
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        configure(&conn)?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn configure(conn: &Connection) -> Result<(), StoreError> {
    // In-memory databases answer "memory"; either reply is acceptable.
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tiles (
            q INTEGER NOT NULL,
            r INTEGER NOT NULL,
            owner TEXT,
            population INTEGER NOT NULL DEFAULT 0,
            has_bonus INTEGER NOT NULL DEFAULT 0,
            is_disconnected INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (q, r)
        );

        CREATE INDEX IF NOT EXISTS tiles_owner ON tiles (owner);

        CREATE TABLE IF NOT EXISTS users (
            username TEXT PRIMARY KEY,
            credential TEXT NOT NULL,
            capital_q INTEGER NOT NULL,
            capital_r INTEGER NOT NULL,
            explored_tiles TEXT NOT NULL DEFAULT '[]'
        );
        ",
    )?;
    Ok(())
}

struct TileRow {
    q: i32,
    r: i32,
    owner: Option<String>,
    population: i64,
    has_bonus: bool,
    is_disconnected: bool,
}

impl TileRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            q: row.get(0)?,
            r: row.get(1)?,
            owner: row.get(2)?,
            population: row.get(3)?,
            has_bonus: row.get(4)?,
            is_disconnected: row.get(5)?,
        })
    }

    fn decode(self) -> Result<(Coord, Tile), StoreError> {
        let coord = Coord::new(self.q, self.r);
        let owner = self
            .owner
            .map(Username::parse)
            .transpose()
            .map_err(|err| StoreError::CorruptRow(format!("tile {coord}: {err}")))?;
        let population = u32::try_from(self.population).map_err(|_| {
            StoreError::CorruptRow(format!("tile {coord}: population {}", self.population))
        })?;
        Ok((
            coord,
            Tile {
                owner,
                population,
                has_bonus: self.has_bonus,
                is_disconnected: self.is_disconnected,
            },
        ))
    }
}

struct UserRow {
    username: String,
    credential: String,
    capital_q: i32,
    capital_r: i32,
    explored_tiles: String,
}

impl UserRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            username: row.get(0)?,
            credential: row.get(1)?,
            capital_q: row.get(2)?,
            capital_r: row.get(3)?,
            explored_tiles: row.get(4)?,
        })
    }

    fn decode(self) -> Result<User, StoreError> {
        let username = Username::parse(self.username.as_str())
            .map_err(|err| StoreError::CorruptRow(format!("user {}: {err}", self.username)))?;
        let explored_tiles: Vec<Coord> = serde_json::from_str(&self.explored_tiles)?;
        Ok(User {
            username,
            credential: Credential::new(self.credential),
            capital: Coord::new(self.capital_q, self.capital_r),
            explored_tiles,
        })
    }
}

fn collect_tiles(rows: Vec<TileRow>) -> Result<Vec<(Coord, Tile)>, StoreError> {
    rows.into_iter().map(TileRow::decode).collect()
}

impl Backend for SqliteBackend {
    fn load_tile(&self, coord: Coord) -> Result<Option<Tile>, StoreError> {
        let conn = lock(&self.conn);
        let row = conn
            .query_row(
                &format!("SELECT {TILE_COLUMNS} FROM tiles WHERE q = ?1 AND r = ?2"),
                params![coord.q(), coord.r()],
                TileRow::read,
            )
            .optional()?;
        row.map(|row| row.decode().map(|(_, tile)| tile)).transpose()
    }

    fn load_user(&self, username: &Username) -> Result<Option<User>, StoreError> {
        let conn = lock(&self.conn);
        let row = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username.as_str()],
                UserRow::read,
            )
            .optional()?;
        row.map(UserRow::decode).transpose()
    }

    fn load_tiles_in(&self, bounds: AxialBounds) -> Result<Vec<(Coord, Tile)>, StoreError> {
        let conn = lock(&self.conn);
        let mut statement = conn.prepare_cached(&format!(
            "SELECT {TILE_COLUMNS} FROM tiles
             WHERE q BETWEEN ?1 AND ?2 AND r BETWEEN ?3 AND ?4"
        ))?;
        let rows = statement
            .query_map(
                params![bounds.min_q, bounds.max_q, bounds.min_r, bounds.max_r],
                TileRow::read,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        collect_tiles(rows)
    }

    fn load_all_tiles(&self) -> Result<Vec<(Coord, Tile)>, StoreError> {
        let conn = lock(&self.conn);
        let mut statement = conn.prepare_cached(&format!("SELECT {TILE_COLUMNS} FROM tiles"))?;
        let rows = statement
            .query_map([], TileRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        collect_tiles(rows)
    }

    fn load_all_users(&self) -> Result<Vec<User>, StoreError> {
        let conn = lock(&self.conn);
        let mut statement = conn.prepare_cached(&format!("SELECT {USER_COLUMNS} FROM users"))?;
        let rows = statement
            .query_map([], UserRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(UserRow::decode).collect()
    }

    fn commit(&self, batch: &PendingBatch) -> Result<(), StoreError> {
        let mut conn = lock(&self.conn);
        let tx = conn.transaction()?;
        {
            let mut upsert_tile = tx.prepare_cached(
                "INSERT INTO tiles (q, r, owner, population, has_bonus, is_disconnected)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (q, r) DO UPDATE SET
                    owner = excluded.owner,
                    population = excluded.population,
                    has_bonus = excluded.has_bonus,
                    is_disconnected = excluded.is_disconnected",
            )?;
            let mut delete_tile = tx.prepare_cached("DELETE FROM tiles WHERE q = ?1 AND r = ?2")?;

            for (coord, tile) in batch.tiles() {
                match tile {
                    Some(tile) => {
                        let _ = upsert_tile.execute(params![
                            coord.q(),
                            coord.r(),
                            tile.owner.as_ref().map(Username::as_str),
                            i64::from(tile.population),
                            tile.has_bonus,
                            tile.is_disconnected,
                        ])?;
                    }
                    None => {
                        let _ = delete_tile.execute(params![coord.q(), coord.r()])?;
                    }
                }
            }

            let mut upsert_user = tx.prepare_cached(
                "INSERT INTO users (username, credential, capital_q, capital_r, explored_tiles)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (username) DO UPDATE SET
                    credential = excluded.credential,
                    capital_q = excluded.capital_q,
                    capital_r = excluded.capital_r,
                    explored_tiles = excluded.explored_tiles",
            )?;
            let mut delete_user = tx.prepare_cached("DELETE FROM users WHERE username = ?1")?;

            for (username, user) in batch.users() {
                match user {
                    Some(user) => {
                        let explored = serde_json::to_string(&user.explored_tiles)?;
                        let _ = upsert_user.execute(params![
                            username.as_str(),
                            user.credential.expose(),
                            user.capital.q(),
                            user.capital.r(),
                            explored,
                        ])?;
                    }
                    None => {
                        let _ = delete_user.execute(params![username.as_str()])?;
                    }
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_round_trips_tiles_and_users() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let alice = Username::parse("alice").unwrap();
        let mut user = User::new(alice.clone(), Credential::new("pw"), Coord::new(4, -2));
        user.explored_tiles.push(Coord::new(5, -2));

        let mut batch = PendingBatch::new();
        batch.stage_tile(Coord::new(4, -2), Some(Tile::owned(alice.clone(), 3)));
        batch.stage_tile(Coord::new(9, 9), Some(Tile::bonus()));
        batch.stage_user(alice.clone(), Some(user.clone()));
        backend.commit(&batch).unwrap();

        assert_eq!(
            backend.load_tile(Coord::new(4, -2)).unwrap(),
            Some(Tile::owned(alice.clone(), 3))
        );
        assert_eq!(backend.load_user(&alice).unwrap(), Some(user));
        assert_eq!(backend.load_all_tiles().unwrap().len(), 2);

        let mut removal = PendingBatch::new();
        removal.stage_tile(Coord::new(9, 9), None);
        backend.commit(&removal).unwrap();
        assert!(backend.load_tile(Coord::new(9, 9)).unwrap().is_none());
    }

    #[test]
    fn window_query_respects_bounds() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let mut batch = PendingBatch::new();
        batch.stage_tile(Coord::new(0, 0), Some(Tile::bonus()));
        batch.stage_tile(Coord::new(50, 0), Some(Tile::bonus()));
        backend.commit(&batch).unwrap();

        let window = AxialBounds::around(Coord::new(0, 0), 10);
        let tiles = backend.load_tiles_in(window).unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].0, Coord::new(0, 0));
    }

    #[test]
    fn corrupt_population_is_reported() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let _ = lock(&backend.conn)
            .execute(
                "INSERT INTO tiles (q, r, owner, population) VALUES (1, 1, 'bob', -4)",
                [],
            )
            .unwrap();
        assert!(matches!(
            backend.load_tile(Coord::new(1, 1)),
            Err(StoreError::CorruptRow(_))
        ));
    }
}
