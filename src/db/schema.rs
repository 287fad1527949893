use rusqlite::{params, Connection};

pub const SCHEMA_VERSION: i32 = 2;

pub const SCHEMA: &str = r#"
-- exercises table
CREATE TABLE IF NOT EXISTS exercises (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    muscleGroup TEXT NOT NULL,
    userId TEXT NOT NULL DEFAULT 'guest'
);

CREATE INDEX IF NOT EXISTS idx_exercises_userId ON exercises(userId);

-- workouts table
CREATE TABLE IF NOT EXISTS workouts (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    userId TEXT NOT NULL DEFAULT 'guest'
);

CREATE INDEX IF NOT EXISTS idx_workouts_userId ON workouts(userId);

-- membership join (no foreign keys: orphans are filtered at read time)
CREATE TABLE IF NOT EXISTS workout_exercise_crossref (
    workoutId TEXT NOT NULL,
    exerciseId TEXT NOT NULL,
    PRIMARY KEY (workoutId, exerciseId)
);

CREATE INDEX IF NOT EXISTS idx_crossref_workoutId ON workout_exercise_crossref(workoutId);
CREATE INDEX IF NOT EXISTS idx_crossref_exerciseId ON workout_exercise_crossref(exerciseId);
"#;

/// Tables that gained a `userId` column in schema version 2.
const USER_SCOPED_TABLES: [&str; 2] = ["exercises", "workouts"];

/// Brings any older database up to `SCHEMA_VERSION`.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version < 2 {
        for table in USER_SCOPED_TABLES {
            if table_exists(conn, table)? && !column_exists(conn, table, "userId")? {
                tracing::info!("Adding userId column to {}", table);
                conn.execute(
                    &format!(
                        "ALTER TABLE {} ADD COLUMN userId TEXT NOT NULL DEFAULT 'guest'",
                        table
                    ),
                    [],
                )?;
            }
        }
    }

    conn.execute_batch(SCHEMA)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERSION_1: &str = r#"
        CREATE TABLE exercises (id TEXT PRIMARY KEY NOT NULL, name TEXT NOT NULL, muscleGroup TEXT NOT NULL);
        CREATE TABLE workouts (id TEXT PRIMARY KEY NOT NULL, name TEXT NOT NULL, description TEXT NOT NULL);
        CREATE TABLE workout_exercise_crossref (workoutId TEXT NOT NULL, exerciseId TEXT NOT NULL, PRIMARY KEY (workoutId, exerciseId));
        INSERT INTO exercises VALUES ('1', 'Bench Press', 'Chest, Triceps');
        INSERT INTO workouts VALUES ('1', 'Push Day', '');
        PRAGMA user_version = 1;
    "#;

    #[test]
    fn fresh_database_gets_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        assert!(column_exists(&conn, "workouts", "userId").unwrap());
    }

    #[test]
    fn version_one_rows_land_in_guest_scope() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(VERSION_1).unwrap();

        migrate(&conn).unwrap();

        let exercise_owner: String = conn
            .query_row("SELECT userId FROM exercises WHERE id = '1'", [], |row| row.get(0))
            .unwrap();
        let workout_owner: String = conn
            .query_row("SELECT userId FROM workouts WHERE id = '1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(exercise_owner, "guest");
        assert_eq!(workout_owner, "guest");
    }

    #[test]
    fn migrate_twice_is_harmless() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(VERSION_1).unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM exercises", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
