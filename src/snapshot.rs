use crate::protocol::{
    AlarmBitmap, CellVoltageRange, IOState, PackLayout, Reply, TemperatureRange, ALARM_BYTES,
    MAX_CELLS, MAX_TEMPERATURE_SENSORS,
};
use crate::Result;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Telemetry accumulated over the poll cycles of one process.
///
/// Each reply overwrites only the fields it carries, so a failed request leaves the values of the
/// previous cycle in place. Cell and sensor slots past the counts of the latest status reply are
/// cleared and stay absent.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct TelemetrySnapshot {
    pub voltage: f32,
    pub current: f32,
    pub state_of_charge: f32,
    pub remaining_capacity_mah: u32,
    pub highest_cell_voltage: u16,
    pub lowest_cell_voltage: u16,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub cell_voltage_range: Option<CellVoltageRange>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub temperature_range: Option<TemperatureRange>,
    pub charge_discharge_status: u8,
    pub charging_mosfet: u8,
    pub discharging_mosfet: u8,
    pub bms_life: u8,
    pub charger_status: u8,
    pub load_status: u8,
    pub io_state: IOState,
    pub cycles: u16,
    pub layout: Option<PackLayout>,
    cell_voltages: [Option<u16>; MAX_CELLS],
    temperatures: [Option<i16>; MAX_TEMPERATURE_SENSORS],
    cell_balancing: [Option<u8>; MAX_CELLS],
    pub balancing_active: bool,
    pub alarms: [AlarmBitmap; ALARM_BYTES],
}

fn place<T: Copy>(slots: &mut [Option<T>], values: &[T]) {
    for (slot, value) in slots.iter_mut().zip(values) {
        *slot = Some(*value);
    }
}

fn truncate<T>(slots: &mut [Option<T>], count: u8) {
    for slot in slots.iter_mut().skip(usize::from(count)) {
        *slot = None;
    }
}

impl TelemetrySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one decoded reply into the snapshot.
    pub fn apply(&mut self, reply: Reply) {
        match reply {
            Reply::Soc(soc) => {
                self.voltage = soc.total_voltage;
                self.current = soc.current;
                self.state_of_charge = soc.soc_percent;
            }
            Reply::CellVoltageRange(range) => {
                self.highest_cell_voltage = range.highest_voltage;
                self.lowest_cell_voltage = range.lowest_voltage;
                self.cell_voltage_range = Some(range);
            }
            Reply::TemperatureRange(range) => self.temperature_range = Some(range),
            Reply::MosfetStatus(status) => {
                self.charge_discharge_status = status.charge_discharge_status;
                self.charging_mosfet = status.charging_mosfet;
                self.discharging_mosfet = status.discharging_mosfet;
                self.bms_life = status.bms_life;
                self.remaining_capacity_mah = status.remaining_capacity_mah;
            }
            Reply::Status(status) => {
                truncate(&mut self.cell_voltages, status.cells);
                truncate(&mut self.cell_balancing, status.cells);
                truncate(&mut self.temperatures, status.temperature_sensors);
                self.layout = Some(PackLayout::from(&status));
                self.charger_status = status.charger_status;
                self.load_status = status.load_status;
                self.io_state = status.states;
                self.cycles = status.cycles;
            }
            Reply::CellVoltages(voltages) => place(&mut self.cell_voltages, &voltages),
            Reply::CellTemperatures(temperatures) => place(&mut self.temperatures, &temperatures),
            Reply::CellBalanceState(state) => {
                place(&mut self.cell_balancing, &state.cells);
                truncate(&mut self.cell_balancing, state.cells.len() as u8);
                self.balancing_active = state.active;
            }
            Reply::Alarms(alarms) => self.alarms = alarms,
        }
    }

    pub fn cell_count(&self) -> Option<u8> {
        self.layout.map(|layout| layout.cells)
    }

    pub fn temperature_sensor_count(&self) -> Option<u8> {
        self.layout.map(|layout| layout.temperature_sensors)
    }

    /// All 16 cell voltage slots in millivolt, `None` past the discovered cell count.
    pub fn cell_voltages(&self) -> &[Option<u16>; MAX_CELLS] {
        &self.cell_voltages
    }

    /// All 4 temperature slots in °C, `None` past the discovered sensor count.
    pub fn temperatures(&self) -> &[Option<i16>; MAX_TEMPERATURE_SENSORS] {
        &self.temperatures
    }

    pub fn cell_balancing(&self) -> &[Option<u8>; MAX_CELLS] {
        &self.cell_balancing
    }
}

/// Consumer of completed snapshots, e.g. a CSV file.
pub trait Sink {
    /// Called once per completed poll cycle; `line_number` starts at 1.
    fn consume(&mut self, line_number: u64, snapshot: &TelemetrySnapshot) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn consume(&mut self, line_number: u64, snapshot: &TelemetrySnapshot) -> Result<()> {
        (**self).consume(line_number, snapshot)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BalanceState, MosfetStatus, Soc, Status};

    fn status(cells: u8, temperature_sensors: u8) -> Reply {
        Reply::Status(Status {
            cells,
            temperature_sensors,
            charger_status: 1,
            load_status: 0,
            states: IOState::from(0x11),
            cycles: 3,
        })
    }

    #[test]
    fn slots_past_counts_are_absent() {
        let mut snapshot = TelemetrySnapshot::new();
        assert!(snapshot.cell_voltages().iter().all(Option::is_none));

        snapshot.apply(status(3, 1));
        snapshot.apply(Reply::CellVoltages(vec![3300, 3301, 3302]));
        snapshot.apply(Reply::CellTemperatures(vec![21]));

        let cells = snapshot.cell_voltages();
        assert_eq!(cells.len(), MAX_CELLS);
        assert_eq!(&cells[..4], &[Some(3300), Some(3301), Some(3302), None]);
        assert_eq!(snapshot.temperatures(), &[Some(21), None, None, None]);
    }

    #[test]
    fn shrinking_layout_hides_stale_cells() {
        let mut snapshot = TelemetrySnapshot::new();
        snapshot.apply(status(4, 2));
        snapshot.apply(Reply::CellVoltages(vec![1, 2, 3, 4]));
        snapshot.apply(status(2, 2));
        assert_eq!(&snapshot.cell_voltages()[..4], &[Some(1), Some(2), None, None]);
        snapshot.apply(status(4, 2));
        assert_eq!(&snapshot.cell_voltages()[..4], &[Some(1), Some(2), None, None]);
    }

    #[test]
    fn partial_reassembly_keeps_previous_values() {
        let mut snapshot = TelemetrySnapshot::new();
        snapshot.apply(status(4, 0));
        snapshot.apply(Reply::CellVoltages(vec![10, 20, 30, 40]));
        snapshot.apply(Reply::CellVoltages(vec![11, 21]));
        assert_eq!(
            &snapshot.cell_voltages()[..4],
            &[Some(11), Some(21), Some(30), Some(40)]
        );
    }

    #[test]
    fn scalar_replies_update_their_fields_only() {
        let mut snapshot = TelemetrySnapshot::new();
        snapshot.apply(Reply::Soc(Soc {
            total_voltage: 52.0,
            collected_voltage: 52.0,
            current: -3.5,
            soc_percent: 80.0,
        }));
        snapshot.apply(Reply::MosfetStatus(MosfetStatus {
            charge_discharge_status: 1,
            charging_mosfet: 1,
            discharging_mosfet: 1,
            bms_life: 9,
            remaining_capacity_mah: 42_000,
        }));
        assert_eq!(snapshot.voltage, 52.0);
        assert_eq!(snapshot.current, -3.5);
        assert_eq!(snapshot.remaining_capacity_mah, 42_000);
        assert_eq!(snapshot.layout, None);

        snapshot.apply(status(2, 0));
        snapshot.apply(Reply::CellBalanceState(BalanceState {
            cells: vec![0, 1],
            active: true,
        }));
        assert_eq!(snapshot.state_of_charge, 80.0);
        assert!(snapshot.balancing_active);
        assert_eq!(&snapshot.cell_balancing()[..3], &[Some(0), Some(1), None]);
        assert!(snapshot.io_state.di1 && snapshot.io_state.do1);
    }
}
