use crate::{json_column, to_json, Result, SqliteStore, StoreError};
use chrono::Local;
use rollcall_core::timetable::{ClassKey, Period, Timetable};
use rusqlite::{params, OptionalExtension};

impl SqliteStore {
    /// Insert or replace the timetable of one class.
    pub async fn upsert_timetable(&self, timetable: Timetable) -> Result<()> {
        timetable.validate().map_err(StoreError::InvalidTimetable)?;
        let periods = to_json(&timetable.periods)?;
        let class = timetable.class.clone();
        let updated_at = Local::now().naive_local();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO timetables (department, year, division, periods, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT (department, year, division)
                     DO UPDATE SET periods = excluded.periods, updated_at = excluded.updated_at",
                    params![class.department, class.year, class.division, periods, updated_at],
                )?;
                Ok(())
            })
            .await?;
        tracing::info!(
            department = %timetable.class.department,
            year = %timetable.class.year,
            division = %timetable.class.division,
            periods = timetable.periods.len(),
            "timetable saved"
        );
        Ok(())
    }

    pub async fn timetable_for(&self, class: &ClassKey) -> Result<Option<Timetable>> {
        let class = class.clone();
        let timetable = self
            .conn
            .call(move |conn| {
                let periods = conn
                    .query_row(
                        "SELECT periods FROM timetables WHERE department = ?1 AND year = ?2 AND division = ?3",
                        params![class.department, class.year, class.division],
                        |row| json_column::<Vec<Period>>(row, 0),
                    )
                    .optional()?;
                Ok(periods.map(|periods| Timetable { class, periods }))
            })
            .await?;
        Ok(timetable)
    }

    pub async fn list_timetables(&self) -> Result<Vec<Timetable>> {
        let timetables = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT department, year, division, periods FROM timetables
                     ORDER BY department, year, division",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(Timetable {
                        class: ClassKey {
                            department: row.get(0)?,
                            year: row.get(1)?,
                            division: row.get(2)?,
                        },
                        periods: json_column(row, 3)?,
                    })
                })?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await?;
        Ok(timetables)
    }
}
