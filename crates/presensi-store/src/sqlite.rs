use presensi_core::policy::{CheckInStatus, CheckOutStatus};
use presensi_core::roll::{max_sequence, next_roll_number};
use presensi_core::store::{Admission, AttendanceStore, StoreError};
use presensi_core::types::{
    AttendanceCounts, AttendanceId, AttendanceRecord, CatalogueEntry, Geofence, Mark, NewAttendance,
    NewStudent, Student, StudentId,
};
use presensi_core::{Coordinates, FaceVector, PresensiError, RollNumber, StudentProfile};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rusqlite::ffi::{SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE};
use rusqlite::{
    params, Connection, ErrorCode, OptionalExtension, Params, Row, Statement, TransactionBehavior,
};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS students (
    id            INTEGER PRIMARY KEY,
    name          TEXT NOT NULL,
    class_label   TEXT NOT NULL,
    major         TEXT NOT NULL,
    roll_number   TEXT NOT NULL UNIQUE,
    photo_path    TEXT NOT NULL,
    face_vector   BLOB,
    registered_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    id                   INTEGER PRIMARY KEY,
    student_id           INTEGER NOT NULL REFERENCES students(id) ON DELETE CASCADE,
    name                 TEXT NOT NULL,
    class_label          TEXT NOT NULL,
    major                TEXT NOT NULL,
    day                  TEXT NOT NULL,
    check_in_at          TEXT NOT NULL,
    check_in_latitude    REAL NOT NULL,
    check_in_longitude   REAL NOT NULL,
    check_in_status      TEXT NOT NULL,
    check_in_distance_m  REAL,
    check_out_at         TEXT,
    check_out_latitude   REAL,
    check_out_longitude  REAL,
    check_out_status     TEXT,
    check_out_distance_m REAL,
    UNIQUE (student_id, day)
);

CREATE INDEX IF NOT EXISTS attendance_day ON attendance (day);

CREATE TABLE IF NOT EXISTS geofence (
    id        INTEGER PRIMARY KEY CHECK (id = 1),
    latitude  REAL NOT NULL,
    longitude REAL NOT NULL,
    radius_m  REAL NOT NULL
);
";

const ATTENDANCE_COLUMNS: &str = "id, student_id, name, class_label, major, day, \
     check_in_at, check_in_latitude, check_in_longitude, check_in_status, check_in_distance_m, \
     check_out_at, check_out_latitude, check_out_longitude, check_out_status, check_out_distance_m";

const STUDENT_COLUMNS: &str =
    "id, name, class_label, major, roll_number, photo_path, face_vector, registered_at";

/// Unique and primary-key violations become `Conflict`, lock timeouts `Busy`.
/// Other constraint failures (foreign key, NOT NULL, CHECK) are backend errors.
fn db_err(e: rusqlite::Error) -> StoreError {
    let detail = |msg: &Option<String>| msg.clone().unwrap_or_else(|| e.to_string());
    match &e {
        rusqlite::Error::SqliteFailure(inner, msg)
            if inner.extended_code == SQLITE_CONSTRAINT_UNIQUE
                || inner.extended_code == SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            StoreError::Conflict(detail(msg))
        }
        rusqlite::Error::SqliteFailure(inner, msg)
            if matches!(inner.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            StoreError::Busy(detail(msg))
        }
        _ => StoreError::Backend(e.to_string()),
    }
}

fn corrupt(what: &str, e: impl Display) -> StoreError {
    StoreError::Corrupt(format!("{what}: {e}"))
}

fn parse_status<S: FromStr<Err = String>>(label: &str) -> Result<S, StoreError> {
    label.parse().map_err(|e: String| corrupt("status", e))
}

/// Exact distance of an out-of-area status; labels only carry whole meters.
fn in_distance(status: &CheckInStatus) -> Option<f64> {
    match status {
        CheckInStatus::OutOfArea { distance_m } => Some(*distance_m),
        _ => None,
    }
}

fn out_distance(status: &CheckOutStatus) -> Option<f64> {
    match status {
        CheckOutStatus::OutOfArea { distance_m } => Some(*distance_m),
        CheckOutStatus::OnTime => None,
    }
}

fn parse_local(at: &str) -> Result<DateTime<FixedOffset>, StoreError> {
    DateTime::parse_from_rfc3339(at).map_err(|e| corrupt("timestamp", e))
}

struct StudentRow {
    id: StudentId,
    name: String,
    class_label: String,
    major: String,
    roll_number: String,
    photo_path: String,
    face_vector: Option<Vec<u8>>,
    registered_at: String,
}

impl StudentRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            class_label: row.get(2)?,
            major: row.get(3)?,
            roll_number: row.get(4)?,
            photo_path: row.get(5)?,
            face_vector: row.get(6)?,
            registered_at: row.get(7)?,
        })
    }

    fn into_student(self) -> Result<Student, StoreError> {
        let vector = match self.face_vector {
            Some(blob) => match FaceVector::from_bytes(&blob) {
                Ok(v) => Some(v),
                Err(e) => {
                    // Unreadable vectors leave the student unmatchable, not the catalogue unreadable.
                    tracing::warn!(student = self.id, error = %e, "ignoring corrupt face vector");
                    None
                }
            },
            None => None,
        };
        let registered_at = DateTime::parse_from_rfc3339(&self.registered_at)
            .map_err(|e| corrupt("registered_at", e))?
            .with_timezone(&Utc);
        Ok(Student {
            id: self.id,
            profile: StudentProfile {
                name: self.name,
                class_label: self.class_label,
                major: self.major,
            },
            roll_number: RollNumber::from_stored(self.roll_number),
            photo_path: PathBuf::from(self.photo_path),
            vector,
            registered_at,
        })
    }
}

struct AttendanceRow {
    id: AttendanceId,
    student_id: StudentId,
    profile: StudentProfile,
    day: String,
    in_at: String,
    in_lat: f64,
    in_lon: f64,
    in_status: String,
    in_distance: Option<f64>,
    out_at: Option<String>,
    out_lat: Option<f64>,
    out_lon: Option<f64>,
    out_status: Option<String>,
    out_distance: Option<f64>,
}

impl AttendanceRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            student_id: row.get(1)?,
            profile: StudentProfile {
                name: row.get(2)?,
                class_label: row.get(3)?,
                major: row.get(4)?,
            },
            day: row.get(5)?,
            in_at: row.get(6)?,
            in_lat: row.get(7)?,
            in_lon: row.get(8)?,
            in_status: row.get(9)?,
            in_distance: row.get(10)?,
            out_at: row.get(11)?,
            out_lat: row.get(12)?,
            out_lon: row.get(13)?,
            out_status: row.get(14)?,
            out_distance: row.get(15)?,
        })
    }

    fn into_record(self) -> Result<AttendanceRecord, StoreError> {
        let day = NaiveDate::parse_from_str(&self.day, "%Y-%m-%d").map_err(|e| corrupt("day", e))?;
        let mut in_status: CheckInStatus = parse_status(&self.in_status)?;
        if let (CheckInStatus::OutOfArea { distance_m }, Some(exact)) = (&mut in_status, self.in_distance) {
            *distance_m = exact;
        }
        let check_out = match (self.out_at, self.out_lat, self.out_lon, self.out_status) {
            (Some(at), Some(latitude), Some(longitude), Some(label)) => {
                let mut status: CheckOutStatus = parse_status(&label)?;
                if let (CheckOutStatus::OutOfArea { distance_m }, Some(exact)) = (&mut status, self.out_distance) {
                    *distance_m = exact;
                }
                Some(Mark {
                    position: Coordinates { latitude, longitude },
                    status,
                    at: parse_local(&at)?,
                })
            }
            (None, _, _, _) => None,
            _ => return Err(StoreError::Corrupt(format!("attendance {} has a partial check-out", self.id))),
        };
        Ok(AttendanceRecord {
            id: self.id,
            student_id: self.student_id,
            profile: self.profile,
            day,
            check_in: Mark {
                position: Coordinates {
                    latitude: self.in_lat,
                    longitude: self.in_lon,
                },
                status: in_status,
                at: parse_local(&self.in_at)?,
            },
            check_out,
        })
    }
}

/// [`AttendanceStore`] backed by a single SQLite database file.
///
/// Roll numbers and (student, day) pairs are unique indices, so concurrent
/// writers, including other processes on the same file, get `Conflict`
/// rather than duplicates. Registrations take the database write lock up
/// front (`BEGIN IMMEDIATE`), so they serialise instead of colliding.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    default_fence: Geofence,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    ///
    /// `default_fence` seeds the geofence row of a fresh database and is
    /// restored by [`AttendanceStore::reset_all`].
    pub fn open(path: &Path, default_fence: Geofence) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        let store = Self::init(conn, default_fence)?;
        tracing::info!(path = %path.display(), "database opened");
        Ok(store)
    }

    pub fn open_in_memory(default_fence: Geofence) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(db_err)?, default_fence)
    }

    fn init(conn: Connection, default_fence: Geofence) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;
        conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA journal_mode=WAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        conn.execute(
            "INSERT OR IGNORE INTO geofence (id, latitude, longitude, radius_m) VALUES (1, ?1, ?2, ?3)",
            params![
                default_fence.center.latitude,
                default_fence.center.longitude,
                default_fence.radius_m
            ],
        )
        .map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            default_fence,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query_students(conn: &Connection) -> Result<Vec<Student>, StoreError> {
        let mut stmt = conn
            .prepare(&format!("SELECT {STUDENT_COLUMNS} FROM students ORDER BY id"))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], StudentRow::read)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        rows.into_iter().map(StudentRow::into_student).collect()
    }
}

fn insert_student(
    conn: &Connection,
    student: &NewStudent,
    roll_number: RollNumber,
) -> Result<Student, StoreError> {
    conn.execute(
        "INSERT INTO students (name, class_label, major, roll_number, photo_path, face_vector, registered_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            student.profile.name,
            student.profile.class_label,
            student.profile.major,
            roll_number.as_str(),
            student.photo_path.to_string_lossy(),
            student.vector.to_bytes(),
            student.registered_at.to_rfc3339(),
        ],
    )
    .map_err(db_err)?;
    let id = conn.last_insert_rowid();
    tracing::debug!(student = id, roll_number = %roll_number, "student row inserted");
    Ok(Student {
        id,
        profile: student.profile.clone(),
        roll_number,
        photo_path: student.photo_path.clone(),
        vector: Some(student.vector.clone()),
        registered_at: student.registered_at,
    })
}

fn attendance_rows(
    stmt: &mut Statement<'_>,
    args: impl Params,
) -> Result<Vec<AttendanceRow>, StoreError> {
    stmt.query_map(args, AttendanceRow::read)
        .map_err(db_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_err)
}

fn count(conn: &Connection, sql: &str, day: Option<&str>) -> Result<u64, StoreError> {
    let n: i64 = match day {
        Some(d) => conn.query_row(sql, [d], |r| r.get(0)),
        None => conn.query_row(sql, [], |r| r.get(0)),
    }
    .map_err(db_err)?;
    Ok(n.max(0) as u64)
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

impl AttendanceStore for SqliteStore {
    fn list_all_vectors(&self) -> Result<Vec<CatalogueEntry>, StoreError> {
        let conn = self.conn();
        Ok(Self::query_students(&conn)?
            .into_iter()
            .map(CatalogueEntry::from)
            .collect())
    }

    fn max_roll_sequence(&self, prefix: &str) -> Result<Option<u32>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT roll_number FROM students WHERE substr(roll_number, 1, length(?1)) = ?1")
            .map_err(db_err)?;
        let rolls = stmt
            .query_map([prefix], |r| r.get::<_, String>(0))
            .map_err(db_err)?
            .map(|r| r.map(RollNumber::from_stored))
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(max_sequence(&rolls, prefix))
    }

    fn append_student_next(
        &self,
        student: &NewStudent,
        admit: &mut Admission<'_>,
    ) -> Result<Student, PresensiError> {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        let existing = Self::query_students(&tx)?;
        let catalogue: Vec<CatalogueEntry> =
            existing.iter().cloned().map(CatalogueEntry::from).collect();
        admit(&catalogue)?;

        let profile = &student.profile;
        let roll_number = next_roll_number(
            &profile.class_label,
            &profile.major,
            existing.iter().map(|s| &s.roll_number),
        );
        let stored = insert_student(&tx, student, roll_number)?;
        tx.commit().map_err(db_err)?;
        Ok(stored)
    }

    fn list_students(&self) -> Result<Vec<Student>, StoreError> {
        Self::query_students(&self.conn())
    }

    fn get_attendance_for(
        &self,
        student: StudentId,
        day: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE student_id = ?1 AND day = ?2"),
            params![student, day_key(day)],
            AttendanceRow::read,
        )
        .optional()
        .map_err(db_err)?
        .map(AttendanceRow::into_record)
        .transpose()
    }

    fn insert_attendance(&self, record: &NewAttendance) -> Result<AttendanceRecord, StoreError> {
        let conn = self.conn();
        let mark = &record.check_in;
        conn.execute(
            "INSERT INTO attendance (student_id, name, class_label, major, day,
                 check_in_at, check_in_latitude, check_in_longitude, check_in_status, check_in_distance_m)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.student_id,
                record.profile.name,
                record.profile.class_label,
                record.profile.major,
                day_key(record.day),
                mark.at.to_rfc3339(),
                mark.position.latitude,
                mark.position.longitude,
                mark.status.to_string(),
                in_distance(&mark.status),
            ],
        )
        .map_err(db_err)?;
        Ok(AttendanceRecord {
            id: conn.last_insert_rowid(),
            student_id: record.student_id,
            profile: record.profile.clone(),
            day: record.day,
            check_in: mark.clone(),
            check_out: None,
        })
    }

    fn update_checkout(
        &self,
        record: AttendanceId,
        mark: &Mark<CheckOutStatus>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE attendance
                 SET check_out_at = ?2, check_out_latitude = ?3, check_out_longitude = ?4,
                     check_out_status = ?5, check_out_distance_m = ?6
                 WHERE id = ?1 AND check_out_at IS NULL",
                params![
                    record,
                    mark.at.to_rfc3339(),
                    mark.position.latitude,
                    mark.position.longitude,
                    mark.status.to_string(),
                    out_distance(&mark.status),
                ],
            )
            .map_err(db_err)?;
        if changed == 1 {
            return Ok(true);
        }
        let exists = conn
            .query_row("SELECT 1 FROM attendance WHERE id = ?1", [record], |_| Ok(()))
            .optional()
            .map_err(db_err)?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(StoreError::NotFound(format!("attendance {record}")))
        }
    }

    fn list_attendance(&self, day: Option<NaiveDate>) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.conn();
        let rows = match day {
            Some(d) => {
                let mut stmt = conn
                    .prepare(&format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE day = ?1"))
                    .map_err(db_err)?;
                attendance_rows(&mut stmt, [day_key(d)])?
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance"))
                    .map_err(db_err)?;
                attendance_rows(&mut stmt, [])?
            }
        };
        let mut records = rows
            .into_iter()
            .map(AttendanceRow::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        // Compare instants, not text: stored offsets may differ.
        records.sort_by(|a, b| b.check_in.at.cmp(&a.check_in.at).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    fn counts(&self, day: NaiveDate) -> Result<AttendanceCounts, StoreError> {
        let conn = self.conn();
        Ok(AttendanceCounts {
            students: count(&conn, "SELECT COUNT(*) FROM students", None)?,
            records: count(&conn, "SELECT COUNT(*) FROM attendance", None)?,
            records_on_day: count(
                &conn,
                "SELECT COUNT(*) FROM attendance WHERE day = ?1",
                Some(day_key(day).as_str()),
            )?,
        })
    }

    fn get_geofence(&self) -> Result<Geofence, StoreError> {
        let conn = self.conn();
        let fence = conn
            .query_row(
                "SELECT latitude, longitude, radius_m FROM geofence WHERE id = 1",
                [],
                |r| {
                    Ok(Geofence {
                        center: Coordinates {
                            latitude: r.get(0)?,
                            longitude: r.get(1)?,
                        },
                        radius_m: r.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)?;
        Ok(fence.unwrap_or(self.default_fence))
    }

    fn set_geofence(&self, fence: &Geofence) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO geofence (id, latitude, longitude, radius_m) VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT (id) DO UPDATE SET
                     latitude = excluded.latitude,
                     longitude = excluded.longitude,
                     radius_m = excluded.radius_m",
                params![fence.center.latitude, fence.center.longitude, fence.radius_m],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn reset_all(&self) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute("DELETE FROM attendance", []).map_err(db_err)?;
        tx.execute("DELETE FROM students", []).map_err(db_err)?;
        tx.execute(
            "UPDATE geofence SET latitude = ?1, longitude = ?2, radius_m = ?3 WHERE id = 1",
            params![
                self.default_fence.center.latitude,
                self.default_fence.center.longitude,
                self.default_fence.radius_m
            ],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use presensi_core::geo::default_geofence;
    use presensi_core::{DuplicateGuard, IdentifierAllocator};

    fn scratch_db() -> PathBuf {
        std::env::temp_dir()
            .join(format!("presensi-store-{}-{:?}", std::process::id(), std::thread::current().id()))
            .join(format!("{}.db", Utc::now().timestamp_nanos_opt().unwrap_or_default()))
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(default_geofence()).unwrap()
    }

    fn student_in(name: &str, class_label: &str, major: &str, vector: Vec<f32>) -> NewStudent {
        NewStudent {
            profile: StudentProfile::new(name, class_label, major).unwrap(),
            photo_path: PathBuf::from(format!("faces/{name}.jpg")),
            vector: FaceVector::new(vector).unwrap(),
            registered_at: Utc.with_ymd_and_hms(2026, 10, 19, 2, 0, 0).unwrap(),
        }
    }

    fn new_student(name: &str, vector: Vec<f32>) -> NewStudent {
        student_in(name, "X", "SIJA1", vector)
    }

    fn admit_all(_: &[CatalogueEntry]) -> Result<(), PresensiError> {
        Ok(())
    }

    fn append(store: &SqliteStore, name: &str, vector: Vec<f32>) -> Student {
        store
            .append_student_next(&new_student(name, vector), &mut admit_all)
            .unwrap()
    }

    /// Insert under a chosen roll number, bypassing allocation.
    fn insert_as(store: &SqliteStore, student: &NewStudent, roll: &str) -> Result<Student, StoreError> {
        insert_student(&store.conn(), student, RollNumber::from_stored(roll.to_string()))
    }

    fn local(day: u32, h: u32, m: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 10, day, h, m, 0)
            .unwrap()
    }

    fn new_attendance(student: &Student, day: u32, status: CheckInStatus) -> NewAttendance {
        let at = local(day, 6, 45);
        NewAttendance {
            student_id: student.id,
            profile: student.profile.clone(),
            day: at.date_naive(),
            check_in: Mark {
                position: Coordinates::new(-6.2705, 106.9611).unwrap(),
                status,
                at,
            },
        }
    }

    #[test]
    fn test_student_round_trip_keeps_vector() {
        let store = store();
        let stored = append(&store, "Ani", vec![0.5, -0.25, 0.125]);
        assert_eq!(stored.roll_number.as_str(), "X-SIJA1-001");

        let listed = store.list_students().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, stored.id);
        assert_eq!(listed[0].profile.name, "Ani");
        assert_eq!(listed[0].registered_at, stored.registered_at);
        assert_eq!(listed[0].vector.as_ref().unwrap().values(), &[0.5, -0.25, 0.125]);

        let catalogue = store.list_all_vectors().unwrap();
        assert_eq!(catalogue[0].roll_number.as_str(), "X-SIJA1-001");
    }

    #[test]
    fn test_duplicate_roll_number_is_conflict() {
        let store = store();
        append(&store, "Ani", vec![0.0]);
        let err = insert_as(&store, &new_student("Budi", vec![1.0]), "X-SIJA1-001").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "{err:?}");
        assert_eq!(store.list_students().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_student_is_backend_error_not_conflict() {
        let store = store();
        let ani = append(&store, "Ani", vec![0.0]);
        let mut orphan = new_attendance(&ani, 20, CheckInStatus::OnTime);
        orphan.student_id = ani.id + 999;
        let err = store.insert_attendance(&orphan).unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)), "{err:?}");
        assert_eq!(PresensiError::from(err).kind(), "processing_failed");
        assert!(store.list_attendance(None).unwrap().is_empty());
    }

    #[test]
    fn test_lock_timeout_maps_to_busy() {
        let failure = rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY);
        let err = db_err(rusqlite::Error::SqliteFailure(failure, None));
        assert!(matches!(err, StoreError::Busy(_)), "{err:?}");
    }

    #[test]
    fn test_allocation_follows_numeric_max_per_cohort() {
        let store = store();
        for (i, (class_label, major, r)) in [
            ("X", "A", "X-A-999"),
            ("X", "A", "X-A-1000"),
            ("X", "AB", "X-AB-005"),
            ("XI", "A", "XI-A-050"),
        ]
        .into_iter()
        .enumerate()
        {
            insert_as(&store, &student_in(&format!("S{i}"), class_label, major, vec![i as f32]), r).unwrap();
        }
        assert_eq!(store.max_roll_sequence("X-A-").unwrap(), Some(1000));
        assert_eq!(store.max_roll_sequence("X-AB-").unwrap(), Some(5));
        assert_eq!(store.max_roll_sequence("XII-A-").unwrap(), None);

        let next = store
            .append_student_next(&student_in("Citra", "X", "A", vec![9.0]), &mut admit_all)
            .unwrap();
        assert_eq!(next.roll_number.as_str(), "X-A-1001");
        let fresh = store
            .append_student_next(&student_in("Dodi", "XII", "A", vec![8.0]), &mut admit_all)
            .unwrap();
        assert_eq!(fresh.roll_number.as_str(), "XII-A-001");
    }

    #[test]
    fn test_refused_admission_rolls_back() {
        let store = store();
        append(&store, "Ani", vec![0.0]);
        let err = store
            .append_student_next(&new_student("Budi", vec![0.0]), &mut |catalogue: &[CatalogueEntry]| {
                DuplicateGuard::default().check(&FaceVector::new(vec![0.0]).unwrap(), catalogue)
            })
            .unwrap_err();
        assert!(matches!(err, PresensiError::DuplicateFace { .. }), "{err:?}");
        assert_eq!(store.list_students().unwrap().len(), 1);
        // The lock is released: the next registration goes through.
        assert_eq!(append(&store, "Citra", vec![5.0]).roll_number.as_str(), "X-SIJA1-002");
    }

    #[test]
    fn test_attendance_unique_per_student_and_day() {
        let store = store();
        let ani = append(&store, "Ani", vec![0.0]);

        let first = store
            .insert_attendance(&new_attendance(&ani, 20, CheckInStatus::OnTime))
            .unwrap();
        let err = store
            .insert_attendance(&new_attendance(&ani, 20, CheckInStatus::Late))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        store
            .insert_attendance(&new_attendance(&ani, 21, CheckInStatus::OnTime))
            .unwrap();

        let day = local(20, 0, 0).date_naive();
        let fetched = store.get_attendance_for(ani.id, day).unwrap().unwrap();
        assert_eq!(fetched, first);
        assert!(store
            .get_attendance_for(ani.id, local(22, 0, 0).date_naive())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_out_of_area_distance_survives_storage() {
        let store = store();
        let ani = append(&store, "Ani", vec![0.0]);
        let inserted = store
            .insert_attendance(&new_attendance(
                &ani,
                20,
                CheckInStatus::OutOfArea { distance_m: 213.734 },
            ))
            .unwrap();
        let listed = store.list_attendance(None).unwrap();
        assert_eq!(listed, vec![inserted]);
    }

    #[test]
    fn test_checkout_written_once() {
        let store = store();
        let ani = append(&store, "Ani", vec![0.0]);
        let rec = store
            .insert_attendance(&new_attendance(&ani, 20, CheckInStatus::OnTime))
            .unwrap();
        let mark = Mark {
            position: Coordinates::new(-6.27, 106.96).unwrap(),
            status: CheckOutStatus::OutOfArea { distance_m: 57.5 },
            at: local(20, 15, 0),
        };
        assert!(store.update_checkout(rec.id, &mark).unwrap());

        let later = Mark {
            at: local(20, 16, 0),
            status: CheckOutStatus::OnTime,
            ..mark
        };
        assert!(!store.update_checkout(rec.id, &later).unwrap());

        let stored = store.get_attendance_for(ani.id, rec.day).unwrap().unwrap();
        assert_eq!(stored.check_out, Some(mark));
        assert!(matches!(
            store.update_checkout(rec.id + 100, &later),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_attendance_newest_first_and_by_day() {
        let store = store();
        let ani = append(&store, "Ani", vec![0.0]);
        let budi = append(&store, "Budi", vec![1.0]);
        store.insert_attendance(&new_attendance(&ani, 19, CheckInStatus::OnTime)).unwrap();
        store.insert_attendance(&new_attendance(&ani, 20, CheckInStatus::OnTime)).unwrap();
        store.insert_attendance(&new_attendance(&budi, 20, CheckInStatus::Late)).unwrap();

        let all = store.list_attendance(None).unwrap();
        let days: Vec<String> = all.iter().map(|r| r.day.to_string()).collect();
        assert_eq!(days, ["2026-10-20", "2026-10-20", "2026-10-19"]);

        let day = local(20, 0, 0).date_naive();
        assert_eq!(store.list_attendance(Some(day)).unwrap().len(), 2);
        assert_eq!(
            store.counts(day).unwrap(),
            AttendanceCounts {
                students: 2,
                records: 3,
                records_on_day: 2
            }
        );
    }

    #[test]
    fn test_geofence_seeded_updated_and_reset() {
        let store = store();
        assert_eq!(store.get_geofence().unwrap(), default_geofence());

        let fence = Geofence::new(Coordinates::new(-6.2, 106.8).unwrap(), 120.0).unwrap();
        store.set_geofence(&fence).unwrap();
        assert_eq!(store.get_geofence().unwrap(), fence);

        let ani = append(&store, "Ani", vec![0.0]);
        store.insert_attendance(&new_attendance(&ani, 20, CheckInStatus::OnTime)).unwrap();

        store.reset_all().unwrap();
        assert!(store.list_students().unwrap().is_empty());
        assert!(store.list_attendance(None).unwrap().is_empty());
        assert_eq!(store.get_geofence().unwrap(), default_geofence());
    }

    #[test]
    fn test_reopen_keeps_data_and_geofence() {
        let path = scratch_db();
        let fence = Geofence::new(Coordinates::new(-6.2, 106.8).unwrap(), 75.0).unwrap();
        {
            let store = SqliteStore::open(&path, default_geofence()).unwrap();
            append(&store, "Ani", vec![0.0, 1.0]);
            store.set_geofence(&fence).unwrap();
        }
        let store = SqliteStore::open(&path, default_geofence()).unwrap();
        assert_eq!(store.list_students().unwrap().len(), 1);
        assert_eq!(store.get_geofence().unwrap(), fence);
        assert_eq!(append(&store, "Budi", vec![1.0, 0.0]).roll_number.as_str(), "X-SIJA1-002");
        cleanup(&path);
    }

    #[test]
    fn test_two_connections_cannot_share_a_roll_number() {
        let path = scratch_db();
        let a = SqliteStore::open(&path, default_geofence()).unwrap();
        let b = SqliteStore::open(&path, default_geofence()).unwrap();
        append(&a, "Ani", vec![0.0]);
        assert_eq!(append(&b, "Budi", vec![1.0]).roll_number.as_str(), "X-SIJA1-002");
        let err = insert_as(&b, &new_student("Citra", vec![2.0]), "X-SIJA1-001").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "{err:?}");
        cleanup(&path);
    }

    #[test]
    fn test_connections_on_one_file_allocate_gapless_roll_numbers() {
        let path = scratch_db();
        let stores: Vec<SqliteStore> = (0..4)
            .map(|_| SqliteStore::open(&path, default_geofence()).unwrap())
            .collect();
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = stores
                .iter()
                .enumerate()
                .map(|(w, store)| {
                    s.spawn(move || {
                        (0..20)
                            .map(|i| {
                                let new = new_student(&format!("S{w}-{i}"), vec![(w * 20 + i) as f32]);
                                IdentifierAllocator::new(store).register(&new, &mut admit_all)
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let mut issued: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap().roll_number.to_string())
            .collect();
        issued.sort();
        let expected: Vec<String> = (1..=80).map(|n| format!("X-SIJA1-{n:03}")).collect();
        assert_eq!(issued, expected);
        assert_eq!(stores[0].list_students().unwrap().len(), 80);
        drop(stores);
        cleanup(&path);
    }

    #[test]
    fn test_connections_on_one_file_admit_a_face_once() {
        let path = scratch_db();
        let stores: Vec<SqliteStore> = (0..2)
            .map(|_| SqliteStore::open(&path, default_geofence()).unwrap())
            .collect();
        let guard = DuplicateGuard::default();
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = stores
                .iter()
                .enumerate()
                .map(|(w, store)| {
                    s.spawn(move || {
                        (0..3)
                            .map(|i| {
                                let new = new_student(&format!("S{w}-{i}"), vec![0.3, 0.3]);
                                IdentifierAllocator::new(store).register(
                                    &new,
                                    &mut |catalogue: &[CatalogueEntry]| guard.check(&new.vector, catalogue),
                                )
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, PresensiError::DuplicateFace { .. })));
        assert_eq!(stores[1].list_students().unwrap().len(), 1);
        drop(stores);
        cleanup(&path);
    }
}
