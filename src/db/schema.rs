use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use super::models::{CategoryType, RecommendationRecord, TargetingCategory};
use super::store::{name_matches, CategoryStore, RecommendationLog, StoreError, StoreResult};

/// SQLite backend for the taxonomy and recommendation history
pub struct Database {
    conn: Mutex<Connection>,
    path: String,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let conn = Connection::open(&path)?;
        let db = Database { conn: Mutex::new(conn), path: path_str };
        db.init()?;
        Ok(db)
    }

    pub fn get_path(&self) -> String {
        self.path.clone()
    }

    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn: Mutex::new(conn), path: ":memory:".to_string() };
        db.init()?;
        Ok(db)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init(&self) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                parent_id TEXT,
                level INTEGER NOT NULL DEFAULT 1,
                size TEXT NOT NULL DEFAULT 'Unknown',
                category_type TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_categories_parent_id ON categories(parent_id);
            CREATE INDEX IF NOT EXISTS idx_categories_type ON categories(category_type);

            CREATE TABLE IF NOT EXISTS recommendations (
                id TEXT PRIMARY KEY,
                user_input TEXT NOT NULL,
                budget_range TEXT,
                geographic_focus TEXT,
                campaign_goal TEXT,
                recommendations TEXT NOT NULL,  -- JSON array of Recommendation
                created_at TEXT NOT NULL
            );
            "
        )?;

        Ok(())
    }

    /// Standard SELECT columns for categories
    const CATEGORY_COLUMNS: &'static str = "id, name, parent_id, level, size, category_type";

    /// Upsert keeps the original rowid, so source order survives overwrites
    const UPSERT_CATEGORY: &'static str =
        "INSERT INTO categories (id, name, parent_id, level, size, category_type)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            parent_id = excluded.parent_id,
            level = excluded.level,
            size = excluded.size,
            category_type = excluded.category_type";

    fn row_to_category(row: &rusqlite::Row) -> rusqlite::Result<TargetingCategory> {
        let parent_id: Option<String> = row.get(2)?;
        let raw_type: String = row.get(5)?;
        let category_type = CategoryType::from_str(&raw_type).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                format!("unknown category_type '{}'", raw_type).into(),
            )
        })?;
        Ok(TargetingCategory {
            id: row.get(0)?,
            name: row.get(1)?,
            parent_id: parent_id.filter(|p| !p.is_empty()),
            level: row.get(3)?,
            size: row.get(4)?,
            category_type,
        })
    }

    fn query_categories(
        &self,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> StoreResult<Vec<TargetingCategory>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM categories {} ORDER BY rowid",
            Self::CATEGORY_COLUMNS,
            where_clause
        ))?;
        let categories = stmt
            .query_map(params, Self::row_to_category)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(categories)
    }

    pub fn delete_all_categories(&self) -> StoreResult<usize> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM categories", [])?)
    }

    /// Category counts per type, for the CLI stats command
    pub fn count_by_type(&self) -> StoreResult<Vec<(String, usize)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT category_type, COUNT(*) FROM categories GROUP BY category_type ORDER BY category_type",
        )?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }
}

impl CategoryStore for Database {
    fn list(&self) -> StoreResult<Vec<TargetingCategory>> {
        self.query_categories("", params![])
    }

    fn get_by_parent(&self, parent_id: Option<&str>) -> StoreResult<Vec<TargetingCategory>> {
        match parent_id {
            Some(parent) => self.query_categories("WHERE parent_id = ?1", params![parent]),
            None => self.query_categories("WHERE parent_id IS NULL OR parent_id = ''", params![]),
        }
    }

    fn get_by_id(&self, id: &str) -> StoreResult<Option<TargetingCategory>> {
        let conn = self.lock()?;
        let category = conn
            .query_row(
                &format!("SELECT {} FROM categories WHERE id = ?1", Self::CATEGORY_COLUMNS),
                params![id],
                Self::row_to_category,
            )
            .optional()?;
        Ok(category)
    }

    // SQLite's LIKE and lower() only fold ASCII, so matching happens in Rust
    // with the same rule as the memory store
    fn search(&self, query: &str) -> StoreResult<Vec<TargetingCategory>> {
        let mut categories = self.list()?;
        categories.retain(|c| name_matches(&c.name, query));
        Ok(categories)
    }

    fn create(&self, category: &TargetingCategory) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            Self::UPSERT_CATEGORY,
            params![
                category.id,
                category.name,
                category.parent(),
                category.level,
                category.size,
                category.category_type.as_str(),
            ],
        )?;
        Ok(())
    }

    fn bulk_insert(&self, categories: &[TargetingCategory]) -> StoreResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(Self::UPSERT_CATEGORY)?;
            for category in categories {
                stmt.execute(params![
                    category.id,
                    category.name,
                    category.parent(),
                    category.level,
                    category.size,
                    category.category_type.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(categories.len())
    }

    fn count(&self) -> StoreResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl RecommendationLog for Database {
    fn save_recommendation(&self, record: &RecommendationRecord) -> StoreResult<()> {
        let recommendations = serde_json::to_string(&record.recommendations)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO recommendations (id, user_input, budget_range, geographic_focus, campaign_goal, recommendations, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.user_input,
                record.budget_range,
                record.geographic_focus,
                record.campaign_goal,
                recommendations,
                record.created_at,
            ],
        )?;
        Ok(())
    }

    fn list_recommendations(&self, limit: Option<usize>) -> StoreResult<Vec<RecommendationRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_input, budget_range, geographic_focus, campaign_goal, recommendations, created_at
             FROM recommendations ORDER BY rowid DESC LIMIT ?1",
        )?;
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, user_input, budget_range, geographic_focus, campaign_goal, recs, created_at)| {
                Ok(RecommendationRecord {
                    id,
                    user_input,
                    budget_range,
                    geographic_focus,
                    campaign_goal,
                    recommendations: serde_json::from_str(&recs)?,
                    created_at,
                })
            })
            .collect()
    }
}
