use bytes::Bytes;
use caprims_dbr::{
    decode, encode_record, AckState, AlarmCondition, AlarmSeverity, ControlLimits, DbrRecord,
    DbrType, DecodeOptions, Family, FieldType, GraphicLimits, Scalar, ScalarKind, TimeStamp, Value,
};

use crate::mask::{AccessRights, EventMask};
use crate::status::Eca;

/// A process variable served by the loopback backend.
#[derive(Debug, Clone)]
pub struct ProcessVariable {
    name: String,
    record_type: String,
    kind: ScalarKind,
    nelm: usize,
    value: Vec<Scalar>,
    units: String,
    precision: i16,
    display: (f64, f64),
    alarm: (f64, f64),
    warning: (f64, f64),
    control: (f64, f64),
    states: Vec<String>,
    status: u16,
    severity: u16,
    ackt: u16,
    acks: u16,
    stamp: TimeStamp,
    pub(crate) access: AccessRights,
    pub(crate) online: bool,
    pub(crate) responsive: bool,
}

impl ProcessVariable {
    /// A single-element record holding `value`'s kind.
    pub fn scalar(name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        let value = value.into();
        let record_type = match value.kind() {
            ScalarKind::String => "stringin",
            ScalarKind::Enum => "mbbo",
            ScalarKind::Long | ScalarKind::Short | ScalarKind::Char => "longout",
            ScalarKind::Float | ScalarKind::Double => "ao",
        };
        let mut pv = Self::empty(name.into(), value.kind(), 1);
        pv.record_type = record_type.into();
        pv.value = vec![value];
        pv
    }

    /// A waveform of `nelm` elements, initially holding no elements.
    pub fn waveform(name: impl Into<String>, kind: ScalarKind, nelm: usize) -> Self {
        let mut pv = Self::empty(name.into(), kind, nelm.max(1));
        pv.record_type = "waveform".into();
        pv
    }

    /// An enumerated record with the given state strings.
    pub fn enumerated(name: impl Into<String>, states: &[&str], index: u16) -> Self {
        let mut pv = Self::empty(name.into(), ScalarKind::Enum, 1);
        pv.record_type = if states.len() <= 2 { "bo" } else { "mbbo" }.into();
        pv.states = states.iter().map(|s| (*s).to_owned()).collect();
        pv.value = vec![Scalar::Enum(index)];
        pv
    }

    fn empty(name: String, kind: ScalarKind, nelm: usize) -> Self {
        Self {
            name,
            record_type: String::new(),
            kind,
            nelm,
            value: Vec::new(),
            units: String::new(),
            precision: 0,
            display: (0.0, 0.0),
            alarm: (0.0, 0.0),
            warning: (0.0, 0.0),
            control: (0.0, 0.0),
            states: Vec::new(),
            status: 0,
            severity: 0,
            ackt: 1,
            acks: 0,
            stamp: TimeStamp::now(),
            access: AccessRights::READ_WRITE,
            online: true,
            responsive: true,
        }
    }

    pub fn with_values(mut self, values: Vec<Scalar>) -> Self {
        self.value = values.into_iter().take(self.nelm).collect();
        self
    }

    pub fn with_record_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = record_type.into();
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    pub fn with_precision(mut self, precision: i16) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_display_limits(mut self, upper: f64, lower: f64) -> Self {
        self.display = (upper, lower);
        self
    }

    /// Major alarm limits (HIHI/LOLO).
    pub fn with_alarm_limits(mut self, upper: f64, lower: f64) -> Self {
        self.alarm = (upper, lower);
        self.evaluate_alarm();
        self
    }

    /// Minor alarm limits (HIGH/LOW).
    pub fn with_warning_limits(mut self, upper: f64, lower: f64) -> Self {
        self.warning = (upper, lower);
        self.evaluate_alarm();
        self
    }

    pub fn with_control_limits(mut self, upper: f64, lower: f64) -> Self {
        self.control = (upper, lower);
        self
    }

    pub fn with_ack(mut self, ackt: u16, acks: u16) -> Self {
        self.ackt = ackt;
        self.acks = acks;
        self
    }

    pub fn with_access(mut self, access: AccessRights) -> Self {
        self.access = access;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        FieldType::from(self.kind)
    }

    pub fn element_count(&self) -> usize {
        self.nelm
    }

    /// Current elements; a waveform holds as many as were last written.
    pub fn values(&self) -> &[Scalar] {
        &self.value
    }

    pub fn alarm_state(&self) -> (u16, u16) {
        (self.status, self.severity)
    }

    /// Render the record as `dbr_type` with `count` elements (zero: current).
    pub(crate) fn read(&self, dbr_type: DbrType, count: usize) -> Result<(Bytes, usize), Eca> {
        if matches!(dbr_type, DbrType::PutAckt | DbrType::PutAcks) {
            return Err(Eca::BADTYPE);
        }
        if dbr_type == DbrType::ClassName {
            let record = DbrRecord {
                status: self.status,
                severity: self.severity,
                ..DbrRecord::new(dbr_type, Value::Scalar(Scalar::Text(self.record_type.clone())))
            };
            let bytes = encode_record(&record, 1).map_err(|_| Eca::GETFAIL)?;
            return Ok((bytes, 1));
        }

        let count = if count == 0 { self.value.len() } else { count };
        if count > self.nelm {
            return Err(Eca::BADCOUNT);
        }
        let desc = dbr_type.descriptor();
        let kind = desc.kind;
        let items = (0..count)
            .map(|idx| match self.value.get(idx) {
                Some(item) => self.to_wire(item, kind),
                None => Ok(Scalar::zero(kind)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let value = match <[Scalar; 1]>::try_from(items) {
            Ok([single]) => Value::Scalar(single),
            Err(items) => Value::Sequence(items),
        };

        let mut record = DbrRecord::new(dbr_type, value);
        record.status = self.status;
        record.severity = self.severity;
        match desc.family {
            Family::Plain | Family::Status => {}
            Family::Time => record.stamp = Some(self.stamp),
            Family::StatusAck => {
                record.ack = Some(AckState {
                    ackt: self.ackt,
                    acks: self.acks,
                })
            }
            Family::Graphic | Family::Control => match kind {
                ScalarKind::String => {}
                ScalarKind::Enum => record.enum_strings = Some(self.states.clone()),
                _ => {
                    if kind.is_floating() {
                        record.precision = Some(self.precision);
                    }
                    record.units = Some(self.units.clone());
                    record.limits = Some(GraphicLimits {
                        upper_disp_limit: cast(self.display.0, kind),
                        lower_disp_limit: cast(self.display.1, kind),
                        upper_alarm_limit: cast(self.alarm.0, kind),
                        upper_warning_limit: cast(self.warning.0, kind),
                        lower_warning_limit: cast(self.warning.1, kind),
                        lower_alarm_limit: cast(self.alarm.1, kind),
                    });
                    if desc.family == Family::Control {
                        record.control = Some(ControlLimits {
                            upper_ctrl_limit: cast(self.control.0, kind),
                            lower_ctrl_limit: cast(self.control.1, kind),
                        });
                    }
                }
            },
        }
        let bytes = encode_record(&record, count).map_err(|_| Eca::GETFAIL)?;
        Ok((bytes, count))
    }

    /// Apply a plain write and report which subscription classes it triggers.
    pub(crate) fn write(
        &mut self,
        dbr_type: DbrType,
        count: usize,
        data: &[u8],
    ) -> Result<EventMask, Eca> {
        let decoded = decode(dbr_type, count, data, &DecodeOptions::default())
            .map_err(|_| Eca::BADTYPE)?;
        let items = decoded.value().to_scalars();

        match dbr_type {
            DbrType::PutAckt => {
                self.ackt = first_u16(&items)?;
                return Ok(EventMask::ALARM);
            }
            DbrType::PutAcks => {
                if first_u16(&items)? >= self.acks {
                    self.acks = 0;
                }
                return Ok(EventMask::ALARM);
            }
            _ => {}
        }

        let converted = items
            .iter()
            .take(self.nelm)
            .map(|item| self.from_wire(item))
            .collect::<Result<Vec<_>, _>>()?;
        self.value = converted;
        self.stamp = TimeStamp::now();

        let mut mask = EventMask::VALUE | EventMask::LOG;
        if self.evaluate_alarm() {
            mask |= EventMask::ALARM;
        }
        Ok(mask)
    }

    /// Server-side update, as if the record had processed.
    pub(crate) fn post(&mut self, values: Vec<Scalar>) -> Result<EventMask, Eca> {
        let converted = values
            .iter()
            .take(self.nelm)
            .map(|item| self.from_wire(item))
            .collect::<Result<Vec<_>, _>>()?;
        self.value = converted;
        self.stamp = TimeStamp::now();
        let mut mask = EventMask::VALUE | EventMask::LOG;
        if self.evaluate_alarm() {
            mask |= EventMask::ALARM;
        }
        Ok(mask)
    }

    // native element -> requested kind
    fn to_wire(&self, item: &Scalar, kind: ScalarKind) -> Result<Scalar, Eca> {
        if item.kind() == kind {
            return Ok(item.clone());
        }
        match (item, kind) {
            (Scalar::Enum(idx), ScalarKind::String) => Ok(Scalar::Text(
                self.states
                    .get(usize::from(*idx))
                    .cloned()
                    .unwrap_or_else(|| idx.to_string()),
            )),
            (Scalar::Float(v), ScalarKind::String) => {
                Ok(Scalar::Text(self.format_floating(f64::from(*v))))
            }
            (Scalar::Double(v), ScalarKind::String) => Ok(Scalar::Text(self.format_floating(*v))),
            (Scalar::Text(text), _) => text
                .trim()
                .parse::<f64>()
                .map(|v| cast(v, kind))
                .map_err(|_| Eca::GETFAIL),
            (numeric, _) => Ok(cast(numeric.as_f64().unwrap_or_default(), kind)),
        }
    }

    // requested element -> native kind
    fn from_wire(&self, item: &Scalar) -> Result<Scalar, Eca> {
        if item.kind() == self.kind {
            return self.check_state(item.clone());
        }
        match (item, self.kind) {
            (Scalar::Text(text), ScalarKind::Enum) => {
                if let Some(idx) = self.states.iter().position(|s| s == text) {
                    return Ok(Scalar::Enum(idx as u16));
                }
                let idx = text.trim().parse::<u16>().map_err(|_| Eca::PUTFAIL)?;
                self.check_state(Scalar::Enum(idx))
            }
            (Scalar::Text(text), _) => text
                .trim()
                .parse::<f64>()
                .map(|v| cast(v, self.kind))
                .map_err(|_| Eca::PUTFAIL),
            (numeric, _) => self.check_state(cast(numeric.as_f64().unwrap_or_default(), self.kind)),
        }
    }

    fn check_state(&self, item: Scalar) -> Result<Scalar, Eca> {
        match item {
            Scalar::Enum(idx) if !self.states.is_empty() && usize::from(idx) >= self.states.len() => {
                Err(Eca::PUTFAIL)
            }
            other => Ok(other),
        }
    }

    fn format_floating(&self, v: f64) -> String {
        match usize::try_from(self.precision) {
            Ok(prec) => format!("{v:.prec$}"),
            Err(_) => v.to_string(),
        }
    }

    /// Recompute the limit alarm; true when status or severity changed.
    fn evaluate_alarm(&mut self) -> bool {
        let Some(v) = self.value.first().and_then(Scalar::as_f64) else {
            return false;
        };
        let (status, severity) = if self.alarm.0 > self.alarm.1 && v >= self.alarm.0 {
            (AlarmCondition::Hihi, AlarmSeverity::Major)
        } else if self.alarm.0 > self.alarm.1 && v <= self.alarm.1 {
            (AlarmCondition::Lolo, AlarmSeverity::Major)
        } else if self.warning.0 > self.warning.1 && v >= self.warning.0 {
            (AlarmCondition::High, AlarmSeverity::Minor)
        } else if self.warning.0 > self.warning.1 && v <= self.warning.1 {
            (AlarmCondition::Low, AlarmSeverity::Minor)
        } else {
            (AlarmCondition::NoAlarm, AlarmSeverity::NoAlarm)
        };
        let (status, severity) = (status as u16, severity as u16);
        let changed = (status, severity) != (self.status, self.severity);
        self.status = status;
        self.severity = severity;
        if severity > self.acks {
            self.acks = severity;
        }
        changed
    }
}

fn first_u16(items: &[Scalar]) -> Result<u16, Eca> {
    items
        .first()
        .and_then(Scalar::as_f64)
        .filter(|v| (0.0..=f64::from(u16::MAX)).contains(v))
        .map(|v| v as u16)
        .ok_or(Eca::BADTYPE)
}

// Numeric conversion with C cast semantics (saturating in Rust).
fn cast(v: f64, kind: ScalarKind) -> Scalar {
    match kind {
        ScalarKind::String => Scalar::Text(v.to_string()),
        ScalarKind::Short => Scalar::Short(v as i16),
        ScalarKind::Float => Scalar::Float(v as f32),
        ScalarKind::Enum => Scalar::Enum(v as u16),
        ScalarKind::Char => Scalar::Char(v as u8),
        ScalarKind::Long => Scalar::Long(v as i32),
        ScalarKind::Double => Scalar::Double(v),
    }
}

/// Records served by [`LoopbackServer::with_demo_records`](super::LoopbackServer::with_demo_records).
pub fn demo_records() -> Vec<ProcessVariable> {
    vec![
        ProcessVariable::scalar("catest", 1.0)
            .with_units("mm")
            .with_precision(4)
            .with_display_limits(20.0, -20.0)
            .with_alarm_limits(20.0, -20.0)
            .with_warning_limits(10.0, -10.0)
            .with_control_limits(0.0, 0.0)
            .with_ack(1, AlarmSeverity::Major as u16),
        ProcessVariable::enumerated("cabo", &["Done", "Busy"], 0),
        ProcessVariable::scalar("castr", "hello"),
        ProcessVariable::scalar("calong", 0)
            .with_display_limits(100.0, 0.0)
            .with_control_limits(100.0, 0.0),
        ProcessVariable::waveform("cawaves", ScalarKind::String, 5),
        ProcessVariable::waveform("cawaveh", ScalarKind::Short, 20),
        ProcessVariable::waveform("cawavef", ScalarKind::Float, 20).with_precision(3),
        ProcessVariable::waveform("cawavec", ScalarKind::Char, 256),
        ProcessVariable::waveform("cawavel", ScalarKind::Long, 20),
        ProcessVariable::waveform("cawave", ScalarKind::Double, 20).with_precision(3),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use caprims_dbr::{encode_elements, Decoded};

    fn read(pv: &ProcessVariable, dbr_type: DbrType, count: usize) -> Decoded {
        let (bytes, count) = pv.read(dbr_type, count).unwrap();
        decode(dbr_type, count, &bytes, &DecodeOptions::default()).unwrap()
    }

    fn catest() -> ProcessVariable {
        demo_records().remove(0)
    }

    #[test]
    fn floating_reads_as_text_with_precision() {
        let decoded = read(&catest(), DbrType::String, 1);
        assert_eq!(decoded.value(), &Value::Scalar(Scalar::Text("1.0000".into())));
    }

    #[test]
    fn ctrl_double_carries_configured_metadata() {
        let decoded = read(&catest(), DbrType::CtrlDouble, 1);
        let record = decoded.record().unwrap();
        assert_eq!(record.units.as_deref(), Some("mm"));
        assert_eq!(record.precision, Some(4));
        let limits = record.limits.as_ref().unwrap();
        assert_eq!(limits.upper_disp_limit, Scalar::Double(20.0));
        assert_eq!(limits.lower_warning_limit, Scalar::Double(-10.0));
        assert_eq!(
            record.control.as_ref().unwrap().upper_ctrl_limit,
            Scalar::Double(0.0)
        );
    }

    #[test]
    fn class_name_reports_record_type() {
        let decoded = read(&catest(), DbrType::ClassName, 1);
        assert_eq!(decoded.value(), &Value::Scalar(Scalar::Text("ao".into())));
    }

    #[test]
    fn enum_accepts_state_names_and_rejects_unknown() {
        let mut pv = ProcessVariable::enumerated("cabo", &["Done", "Busy"], 0);
        let busy = encode_elements(DbrType::String, &[Scalar::Text("Busy".into())], 1).unwrap();
        pv.write(DbrType::String, 1, &busy).unwrap();
        assert_eq!(pv.values(), &[Scalar::Enum(1)]);

        let bad = encode_elements(DbrType::String, &[Scalar::Text("Idle".into())], 1).unwrap();
        assert_eq!(pv.write(DbrType::String, 1, &bad), Err(Eca::PUTFAIL));
        let out_of_range = encode_elements(DbrType::Enum, &[Scalar::Enum(7)], 1).unwrap();
        assert_eq!(pv.write(DbrType::Enum, 1, &out_of_range), Err(Eca::PUTFAIL));
    }

    #[test]
    fn waveform_reads_past_written_elements_as_zero() {
        let mut pv = ProcessVariable::waveform("wave", ScalarKind::Double, 20);
        let data = encode_elements(
            DbrType::Double,
            &[Scalar::Double(1.0), Scalar::Double(2.0), Scalar::Double(3.0)],
            3,
        )
        .unwrap();
        pv.write(DbrType::Double, 3, &data).unwrap();

        let decoded = read(&pv, DbrType::Double, 20);
        assert_eq!(decoded.value().len(), 20);
        assert_eq!(decoded.value().element(2), Some(Scalar::Double(3.0)));
        assert_eq!(decoded.value().element(19), Some(Scalar::Double(0.0)));
        assert_eq!(pv.read(DbrType::Double, 21), Err(Eca::BADCOUNT));
    }

    #[test]
    fn writes_past_limits_raise_alarms() {
        let mut pv = catest();
        let high = encode_elements(DbrType::Double, &[Scalar::Double(12.0)], 1).unwrap();
        let mask = pv.write(DbrType::Double, 1, &high).unwrap();
        assert!(mask.contains(EventMask::ALARM));
        assert_eq!(
            pv.alarm_state(),
            (AlarmCondition::High as u16, AlarmSeverity::Minor as u16)
        );

        let same = pv.write(DbrType::Double, 1, &high).unwrap();
        assert!(!same.contains(EventMask::ALARM));

        let hihi = encode_elements(DbrType::Double, &[Scalar::Double(25.0)], 1).unwrap();
        pv.write(DbrType::Double, 1, &hihi).unwrap();
        assert_eq!(pv.alarm_state().1, AlarmSeverity::Major as u16);
    }

    #[test]
    fn acknowledgement_writes_update_ack_state() {
        let mut pv = catest();
        let acks = encode_elements(DbrType::PutAcks, &[Scalar::Short(2)], 1);
        let acks = acks.unwrap();
        pv.write(DbrType::PutAcks, 1, &acks).unwrap();
        let decoded = read(&pv, DbrType::StsackString, 1);
        assert_eq!(decoded.record().unwrap().ack.unwrap().acks, 0);
        assert_eq!(pv.read(DbrType::PutAckt, 1), Err(Eca::BADTYPE));
    }
}
