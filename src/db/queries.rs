use super::models::{
    Assignment, CorpusCounts, CorpusRow, FeatureRecord, FeatureTable, FeatureValues, LoadedTable,
};
use super::{Database, DbError, Result};
use rusqlite::params;

impl Database {
    /// Replace the whole songs table with `table`, preserving row order.
    ///
    /// Runs in one transaction and restarts row ids, so writing the same table
    /// twice leaves an identical database. Any previous cluster assignment and
    /// projection columns are discarded with the old rows.
    pub fn replace_feature_table(&self, table: &FeatureTable) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute("DELETE FROM songs", [])?;
        tx.execute("DELETE FROM sqlite_sequence WHERE name = 'songs'", [])?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO songs (filename, genre, tempo, energy, loudness, valence, danceability)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for r in &table.rows {
                let f = &r.features;
                stmt.execute(params![
                    r.filename, r.genre, f.tempo, f.energy, f.loudness, f.valence, f.danceability,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Read the feature table back in row order. NULL features become 0.
    pub fn load_feature_table(&self) -> Result<LoadedTable> {
        let mut stmt = self.conn.prepare(
            "SELECT id, filename, genre, tempo, energy, loudness, valence, danceability
             FROM songs ORDER BY id",
        )?;

        let raw = stmt
            .query_map([], |row| {
                let mut values: [Option<f64>; 5] = [None; 5];
                for (i, v) in values.iter_mut().enumerate() {
                    *v = row.get(3 + i)?;
                }
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?, values))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut filled_cells = 0;
        let mut ids = Vec::with_capacity(raw.len());
        let mut rows = Vec::with_capacity(raw.len());
        for (id, filename, genre, values) in raw {
            let (features, filled) = zero_fill(values);
            filled_cells += filled;
            ids.push(id);
            rows.push(FeatureRecord {
                filename,
                genre,
                features: FeatureValues::from_array(features),
            });
        }

        if filled_cells > 0 {
            log::warn!("{} missing feature values filled with 0", filled_cells);
        }

        Ok(LoadedTable {
            ids,
            table: FeatureTable { rows },
            filled_cells,
        })
    }

    /// Read arbitrary numeric columns (rows × columns) in row order, NULL → 0.
    /// Column names are checked against the table so they can be quoted safely.
    pub fn read_numeric_columns(&self, columns: &[String]) -> Result<Vec<Vec<f64>>> {
        let present = self.column_names()?;
        let missing: Vec<String> = columns
            .iter()
            .filter(|c| !present.contains(c))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(DbError::Schema { missing });
        }

        let select = columns
            .iter()
            .map(|c| format!("\"{}\"", c.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {select} FROM songs ORDER BY id");

        let mut stmt = self.conn.prepare(&sql)?;
        let width = columns.len();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, Option<f64>>(i).map(|v| v.unwrap_or(0.0)))
                    .collect::<std::result::Result<Vec<f64>, _>>()
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Write cluster ids and projection coordinates for existing rows.
    pub fn store_assignments(&self, assignments: &[Assignment]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE songs SET
                    kmeans_cluster = ?1,
                    pca_1 = ?2, pca_2 = ?3,
                    pca_3d_1 = ?4, pca_3d_2 = ?5, pca_3d_3 = ?6
                 WHERE id = ?7",
            )?;
            for a in assignments {
                stmt.execute(params![
                    a.cluster as i64,
                    a.pca_2d[0], a.pca_2d[1],
                    a.pca_3d[0], a.pca_3d[1], a.pca_3d[2],
                    a.row_id,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Load the assigned corpus for the analytics engine.
    ///
    /// Fails with [`DbError::Schema`] if required columns are absent and with
    /// [`DbError::Unassigned`] if any row has no cluster id.
    pub fn load_corpus(&self) -> Result<Vec<CorpusRow>> {
        self.check_corpus_schema()?;

        let unassigned: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM songs WHERE kmeans_cluster IS NULL",
            [],
            |row| row.get(0),
        )?;
        if unassigned > 0 {
            return Err(DbError::Unassigned { rows: unassigned as usize });
        }

        let mut stmt = self.conn.prepare(
            "SELECT filename, genre, tempo, energy, loudness, valence, danceability,
                    kmeans_cluster, pca_1, pca_2, pca_3d_1, pca_3d_2, pca_3d_3
             FROM songs ORDER BY id",
        )?;

        let mut filled_cells = 0;
        let rows = stmt
            .query_map([], |row| {
                let mut features: [Option<f64>; 5] = [None; 5];
                for (i, v) in features.iter_mut().enumerate() {
                    *v = row.get(2 + i)?;
                }
                let mut coords: [Option<f64>; 5] = [None; 5];
                for (i, v) in coords.iter_mut().enumerate() {
                    *v = row.get(8 + i)?;
                }
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    features,
                    row.get::<_, i64>(7)?,
                    coords,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(filename, genre, features, cluster, coords)| {
                let (features, filled) = zero_fill(features);
                filled_cells += filled;
                let (coords, filled) = zero_fill(coords);
                filled_cells += filled;
                CorpusRow {
                    record: FeatureRecord {
                        filename,
                        genre,
                        features: FeatureValues::from_array(features),
                    },
                    cluster,
                    pca_2d: [coords[0], coords[1]],
                    pca_3d: [coords[2], coords[3], coords[4]],
                }
            })
            .collect::<Vec<_>>();

        if filled_cells > 0 {
            log::warn!("{} missing corpus values filled with 0", filled_cells);
        }
        log::info!("Loaded corpus: {} songs", rows.len());

        Ok(rows)
    }

    /// Row and genre counts for the `stats` overview.
    pub fn counts(&self) -> Result<CorpusCounts> {
        let total_songs: i64 = self.conn.query_row("SELECT COUNT(*) FROM songs", [], |r| r.get(0))?;
        let assigned_songs: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM songs WHERE kmeans_cluster IS NOT NULL",
            [],
            |r| r.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT genre, COUNT(*) FROM songs GROUP BY genre ORDER BY COUNT(*) DESC, genre",
        )?;
        let genres = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(CorpusCounts {
            total_songs: total_songs as usize,
            assigned_songs: assigned_songs as usize,
            genres,
        })
    }
}

/// Replace missing values with 0, returning how many were filled.
fn zero_fill<const N: usize>(values: [Option<f64>; N]) -> ([f64; N], usize) {
    let mut filled = 0;
    let out = values.map(|v| match v {
        Some(x) if x.is_finite() => x,
        _ => {
            filled += 1;
            0.0
        }
    });
    (out, filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(filename: &str, genre: &str, tempo: f64) -> FeatureRecord {
        FeatureRecord {
            filename: filename.to_string(),
            genre: genre.to_string(),
            features: FeatureValues {
                tempo,
                energy: 0.12,
                loudness: 0.12,
                valence: 0.31,
                danceability: 0.33,
            },
        }
    }

    fn sample_table() -> FeatureTable {
        FeatureTable {
            rows: vec![
                record("blues.00000.wav", "blues", 123.0),
                record("jazz.00001.wav", "jazz", 92.3),
                record("rock.00002.wav", "rock", 143.5),
            ],
        }
    }

    #[test]
    fn test_replace_and_load_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let table = sample_table();
        db.replace_feature_table(&table).unwrap();

        let loaded = db.load_feature_table().unwrap();
        assert_eq!(loaded.table, table);
        assert_eq!(loaded.ids, vec![1, 2, 3]);
        assert_eq!(loaded.filled_cells, 0);
    }

    #[test]
    fn test_replace_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let table = sample_table();
        db.replace_feature_table(&table).unwrap();
        db.replace_feature_table(&table).unwrap();

        let loaded = db.load_feature_table().unwrap();
        assert_eq!(loaded.table, table);
        assert_eq!(loaded.ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_null_features_are_zero_filled_and_counted() {
        let db = Database::open_in_memory().unwrap();
        db.conn
            .execute(
                "INSERT INTO songs (filename, genre, tempo, energy) VALUES ('a.wav', 'pop', 110.0, 0.2)",
                [],
            )
            .unwrap();

        let loaded = db.load_feature_table().unwrap();
        let f = &loaded.table.rows[0].features;
        assert_eq!(f.tempo, 110.0);
        assert_eq!(f.loudness, 0.0);
        assert_eq!(f.danceability, 0.0);
        assert_eq!(loaded.filled_cells, 3);
    }

    #[test]
    fn test_read_numeric_columns_rejects_unknown_column() {
        let db = Database::open_in_memory().unwrap();
        db.replace_feature_table(&sample_table()).unwrap();

        let cols = vec!["tempo".to_string(), "mfcc_1".to_string()];
        match db.read_numeric_columns(&cols) {
            Err(DbError::Schema { missing }) => assert_eq!(missing, vec!["mfcc_1"]),
            other => panic!("expected schema error, got {:?}", other.map(|r| r.len())),
        }

        let rows = db.read_numeric_columns(&["tempo".to_string()]).unwrap();
        assert_eq!(rows, vec![vec![123.0], vec![92.3], vec![143.5]]);
    }

    #[test]
    fn test_load_corpus_requires_assignments() {
        let db = Database::open_in_memory().unwrap();
        db.replace_feature_table(&sample_table()).unwrap();

        match db.load_corpus() {
            Err(DbError::Unassigned { rows }) => assert_eq!(rows, 3),
            other => panic!("expected unassigned error, got {:?}", other.map(|r| r.len())),
        }
    }

    #[test]
    fn test_store_assignments_and_load_corpus() {
        let db = Database::open_in_memory().unwrap();
        db.replace_feature_table(&sample_table()).unwrap();
        let loaded = db.load_feature_table().unwrap();

        let assignments: Vec<Assignment> = loaded
            .ids
            .iter()
            .enumerate()
            .map(|(i, &row_id)| Assignment {
                row_id,
                cluster: i % 2,
                pca_2d: [i as f64, -(i as f64)],
                pca_3d: [i as f64, 0.5, 1.5],
            })
            .collect();
        db.store_assignments(&assignments).unwrap();

        let corpus = db.load_corpus().unwrap();
        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus[1].record.filename, "jazz.00001.wav");
        assert_eq!(corpus[1].cluster, 1);
        assert_eq!(corpus[2].cluster, 0);
        assert_eq!(corpus[2].pca_2d, [2.0, -2.0]);
        assert_eq!(corpus[2].pca_3d, [2.0, 0.5, 1.5]);

        let counts = db.counts().unwrap();
        assert_eq!(counts.total_songs, 3);
        assert_eq!(counts.assigned_songs, 3);
        assert_eq!(counts.genres.len(), 3);
    }

    #[test]
    fn test_replace_clears_previous_assignments() {
        let db = Database::open_in_memory().unwrap();
        db.replace_feature_table(&sample_table()).unwrap();
        db.store_assignments(&[Assignment {
            row_id: 1,
            cluster: 4,
            pca_2d: [0.0, 0.0],
            pca_3d: [0.0, 0.0, 0.0],
        }])
        .unwrap();

        db.replace_feature_table(&sample_table()).unwrap();
        assert_eq!(db.counts().unwrap().assigned_songs, 0);
    }
}
