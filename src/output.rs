use anyhow::{Context, Result};
use bmslog_lib::protocol::{ALARM_BYTES, MAX_CELLS, MAX_TEMPERATURE_SENSORS};
use bmslog_lib::snapshot::{Sink, TelemetrySnapshot};
use serde_json::json;
use std::fs::File;
use std::path::{Path, PathBuf};

fn sink_error(err: impl std::error::Error + Send + Sync + 'static) -> bmslog_lib::Error {
    bmslog_lib::Error::Sink(Box::new(err))
}

fn optional<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(T::to_string).unwrap_or_default()
}

/// Appends one row per completed poll cycle to `EPData<yyMMdd_HHmmss>.csv`.
pub struct CsvSink {
    writer: csv::Writer<File>,
    path: PathBuf,
}

impl CsvSink {
    pub const FILE_PREFIX: &'static str = "EPData";

    pub fn create(directory: &Path) -> Result<Self> {
        let file_name = format!(
            "{}{}.csv",
            Self::FILE_PREFIX,
            chrono::Local::now().format("%y%m%d_%H%M%S")
        );
        let path = directory.join(file_name);
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Cannot create CSV file {path:?}"))?;
        writer
            .write_record(Self::header())
            .with_context(|| format!("Cannot write CSV header to {path:?}"))?;
        writer.flush()?;
        log::info!("Writing CSV to {path:?}");
        Ok(Self { writer, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn header() -> Vec<String> {
        let mut header: Vec<String> = [
            "Line #",
            "Timestamp",
            "Current (A)",
            "Voltage (V)",
            "State Of Charge (%)",
            "Remaining Capacity (mAh)",
        ]
        .map(String::from)
        .to_vec();
        header.extend((1..=MAX_CELLS).map(|n| format!("Cell Voltage {n} (mV)")));
        header.push("Highest Cell Voltage (mV)".into());
        header.push("Lowest Cell Voltage (mV)".into());
        header.extend((1..=MAX_TEMPERATURE_SENSORS).map(|n| format!("Temperature {n} (C)")));
        header.extend(
            [
                "Charging (1) Discharging (2) Status",
                "Charging MOS Status",
                "Discharging MOS Status",
                "Balancing Status",
                "Cell Balancing Status",
            ]
            .map(String::from),
        );
        header.extend((1..=ALARM_BYTES).map(|n| format!("Alarm {n}")));
        header
    }

    fn record(line_number: u64, timestamp: &str, snapshot: &TelemetrySnapshot) -> Vec<String> {
        let mut record = vec![
            line_number.to_string(),
            timestamp.to_string(),
            format!("{:.2}", snapshot.current),
            format!("{:.2}", snapshot.voltage),
            format!("{:.2}", snapshot.state_of_charge),
            snapshot.remaining_capacity_mah.to_string(),
        ];
        record.extend(snapshot.cell_voltages().iter().map(optional));
        record.push(snapshot.highest_cell_voltage.to_string());
        record.push(snapshot.lowest_cell_voltage.to_string());
        record.extend(snapshot.temperatures().iter().map(optional));
        record.push(snapshot.charge_discharge_status.to_string());
        record.push(snapshot.charging_mosfet.to_string());
        record.push(snapshot.discharging_mosfet.to_string());
        record.push(u8::from(snapshot.balancing_active).to_string());
        record.push(
            snapshot
                .cell_balancing()
                .iter()
                .flatten()
                .map(|state| state.to_string())
                .collect(),
        );
        record.extend(snapshot.alarms.iter().map(|alarm| alarm.to_string()));
        record
    }
}

impl Sink for CsvSink {
    fn consume(
        &mut self,
        line_number: u64,
        snapshot: &TelemetrySnapshot,
    ) -> bmslog_lib::Result<()> {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        self.writer
            .write_record(Self::record(line_number, &timestamp, snapshot))
            .map_err(sink_error)?;
        self.writer.flush().map_err(sink_error)?;
        log::debug!("Line {line_number} written to {:?}", self.path);
        Ok(())
    }

    fn flush(&mut self) -> bmslog_lib::Result<()> {
        self.writer.flush().map_err(sink_error)
    }
}

/// Prints every snapshot to the standard output.
pub struct ConsoleSink;

impl Sink for ConsoleSink {
    fn consume(
        &mut self,
        line_number: u64,
        snapshot: &TelemetrySnapshot,
    ) -> bmslog_lib::Result<()> {
        println!(
            "--- Line {line_number} at {} ---",
            chrono::Local::now().to_rfc3339()
        );
        println!("{snapshot:#?}");
        println!("--------------------------");
        Ok(())
    }
}

/// Prints one JSON object per snapshot to the standard output.
pub struct JsonSink;

impl Sink for JsonSink {
    fn consume(
        &mut self,
        line_number: u64,
        snapshot: &TelemetrySnapshot,
    ) -> bmslog_lib::Result<()> {
        let payload = json!({
            "line": line_number,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "snapshot": snapshot,
        });
        println!("{payload}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmslog_lib::protocol::{BalanceState, Reply, Status};

    fn snapshot() -> TelemetrySnapshot {
        let mut snapshot = TelemetrySnapshot::new();
        snapshot.apply(Reply::Status(Status {
            cells: 2,
            temperature_sensors: 1,
            charger_status: 0,
            load_status: 0,
            states: Default::default(),
            cycles: 0,
        }));
        snapshot.apply(Reply::CellVoltages(vec![3300, 3310]));
        snapshot.apply(Reply::CellTemperatures(vec![-5]));
        snapshot.apply(Reply::CellBalanceState(BalanceState {
            cells: vec![0, 1],
            active: true,
        }));
        snapshot
    }

    #[test]
    fn csv_rows_mark_absent_slots_empty() {
        let directory = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::create(directory.path()).unwrap();
        assert!(sink
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("EPData"));

        sink.consume(1, &snapshot()).unwrap();
        sink.consume(2, &snapshot()).unwrap();
        sink.flush().unwrap();

        let mut reader = csv::Reader::from_path(sink.path()).unwrap();
        let header = reader.headers().unwrap().clone();
        assert_eq!(header.len(), 6 + MAX_CELLS + 2 + MAX_TEMPERATURE_SENSORS + 5 + ALARM_BYTES);
        assert_eq!(&header[6], "Cell Voltage 1 (mV)");

        let rows: Vec<csv::StringRecord> = reader.records().map(|row| row.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        let row = &rows[0];
        assert_eq!(row.len(), header.len());
        assert_eq!(&row[0], "1");
        assert_eq!(&row[6], "3300");
        assert_eq!(&row[7], "3310");
        assert_eq!(&row[8], "");
        assert_eq!(&row[6 + MAX_CELLS + 2], "-5");
        assert_eq!(&row[6 + MAX_CELLS + 3], "");
        let balancing = 6 + MAX_CELLS + 2 + MAX_TEMPERATURE_SENSORS + 3;
        assert_eq!(&row[balancing], "1");
        assert_eq!(&row[balancing + 1], "01");
        assert_eq!(&row[balancing + 2], "00000000");
        assert_eq!(&rows[1][0], "2");
    }

    #[test]
    fn json_snapshot_keeps_absent_slots_null() {
        let value = serde_json::to_value(snapshot()).unwrap();
        assert_eq!(value["cell_voltages"][1], 3310);
        assert!(value["cell_voltages"][2].is_null());
        assert_eq!(value["alarms"][0], "00000000");
    }
}
