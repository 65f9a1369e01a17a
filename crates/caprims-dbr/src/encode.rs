use bytes::{BufMut, Bytes, BytesMut};

use crate::catalog::{
    DbrType, Family, FieldType, ScalarKind, TypeDescriptor, MAX_ENUM_STATES, MAX_ENUM_STRING_SIZE,
    MAX_STRING_SIZE, MAX_UNITS_SIZE,
};
use crate::error::{DbrError, Result};
use crate::record::{DbrRecord, GraphicLimits};
use crate::value::{put_fixed_text, PutValue, Scalar};

/// What to do with a write longer than the channel or request allows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PutLengthPolicy {
    /// Write `min(requested, native, supplied)` elements.
    #[default]
    Truncate,
    /// Fail with [`DbrError::TooManyElements`].
    Reject,
}

/// Shape of a write request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutRequest {
    /// Request type. `None` writes the channel's native field type.
    pub dbr_type: Option<DbrType>,
    /// Element count. `None`, zero, negative or above native means native.
    pub count: Option<i64>,
    pub policy: PutLengthPolicy,
}

impl PutRequest {
    pub fn with_type(mut self, dbr_type: DbrType) -> Self {
        self.dbr_type = Some(dbr_type);
        self
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_policy(mut self, policy: PutLengthPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// The channel a write is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutTarget {
    pub field_type: FieldType,
    pub native_count: usize,
}

/// An encoded write, ready to hand to the native library.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPut {
    pub dbr_type: DbrType,
    pub count: usize,
    pub buffer: Bytes,
}

/// Coerce an application value into a native write buffer.
///
/// The element count is `min(requested, native, supplied)`. Text aimed at an
/// enum field is sent as `DBR_STRING` so the server resolves the state name;
/// text aimed at a char field is sent as its bytes plus a terminator.
pub fn prepare_put(
    target: PutTarget,
    request: &PutRequest,
    value: &PutValue,
) -> Result<PreparedPut> {
    let mut dbr_type = match request.dbr_type {
        Some(dbr_type) => dbr_type,
        None => target
            .field_type
            .promote(Family::Plain)
            .ok_or(DbrError::InvalidType(target.field_type.as_raw()))?,
    };
    if !dbr_type.is_writable() {
        return Err(DbrError::NotWritable(dbr_type));
    }

    let native = target.native_count.max(1);
    let bound = match request.count {
        Some(count) if count > 0 && (count as usize) <= native => count as usize,
        _ => native,
    };

    let elements: Vec<Scalar> = match value {
        PutValue::Scalar(Scalar::Text(text)) => match dbr_type {
            DbrType::Enum => {
                dbr_type = DbrType::String;
                vec![Scalar::Text(text.clone())]
            }
            DbrType::Char => text
                .bytes()
                .chain(std::iter::once(0))
                .map(Scalar::Char)
                .collect(),
            _ => vec![Scalar::Text(text.clone())],
        },
        PutValue::Scalar(scalar) => vec![scalar.clone()],
        PutValue::Sequence(items) => {
            if dbr_type == DbrType::Enum && items.iter().any(|s| s.kind() == ScalarKind::String) {
                dbr_type = DbrType::String;
            }
            items.clone()
        }
    };

    let supplied = elements.len();
    if supplied == 0 {
        return Err(DbrError::Empty);
    }
    if request.policy == PutLengthPolicy::Reject && supplied > bound {
        return Err(DbrError::TooManyElements {
            supplied,
            allowed: bound,
        });
    }

    let count = bound.min(supplied);
    if count < supplied {
        tracing::debug!(supplied, count, %dbr_type, "truncating write to element bound");
    }
    let buffer = encode_elements(dbr_type, &elements[..count], count)?;
    Ok(PreparedPut {
        dbr_type,
        count,
        buffer,
    })
}

/// Encode a plain buffer of `count` elements, zero-padding missing elements.
pub fn encode_elements(dbr_type: DbrType, items: &[Scalar], count: usize) -> Result<Bytes> {
    let desc = dbr_type.descriptor();
    if desc.family != Family::Plain {
        return Err(DbrError::NotWritable(dbr_type));
    }
    let mut dst = BytesMut::with_capacity(desc.size_for(count as i64));
    put_value(desc, items, count, &mut dst)?;
    Ok(dst.freeze())
}

/// Encode a full record of any family with `count` value elements.
///
/// Missing metadata is written as zeros; missing value elements are
/// zero-filled up to `count`.
pub fn encode_record(record: &DbrRecord, count: usize) -> Result<Bytes> {
    let desc = record.dbr_type.descriptor();
    let mut dst = BytesMut::with_capacity(desc.size_for(count as i64));

    if desc.family.has_status() {
        put_header(desc, record, &mut dst)?;
    }
    let written = dst.len();
    dst.put_bytes(0, desc.value_offset.saturating_sub(written));

    let items = record.value.to_scalars();
    put_value(desc, &items, count, &mut dst)?;
    Ok(dst.freeze())
}

fn put_value(
    desc: &TypeDescriptor,
    items: &[Scalar],
    count: usize,
    dst: &mut BytesMut,
) -> Result<()> {
    let zero = Scalar::zero(desc.kind);
    for idx in 0..count.max(1) {
        put_scalar(desc.kind, items.get(idx).unwrap_or(&zero), dst)?;
    }
    Ok(())
}

fn put_header(desc: &TypeDescriptor, record: &DbrRecord, dst: &mut BytesMut) -> Result<()> {
    dst.put_u16_ne(record.status);
    dst.put_u16_ne(record.severity);

    match desc.family {
        Family::Plain | Family::Status => {}
        Family::StatusAck => {
            let ack = record.ack.unwrap_or(crate::record::AckState { ackt: 0, acks: 0 });
            dst.put_u16_ne(ack.ackt);
            dst.put_u16_ne(ack.acks);
        }
        Family::Time => {
            let stamp = record.stamp.unwrap_or_default();
            dst.put_u32_ne(stamp.sec_past_epoch);
            dst.put_u32_ne(stamp.nsec);
        }
        Family::Graphic | Family::Control => put_graphic(desc, record, dst)?,
    }
    Ok(())
}

fn put_graphic(desc: &TypeDescriptor, record: &DbrRecord, dst: &mut BytesMut) -> Result<()> {
    let kind = desc.kind;
    match kind {
        ScalarKind::String => return Ok(()),
        ScalarKind::Enum => {
            let strings = record.enum_strings.as_deref().unwrap_or_default();
            let no_str = strings.len().min(MAX_ENUM_STATES);
            dst.put_i16_ne(no_str as i16);
            for idx in 0..MAX_ENUM_STATES {
                let text = strings.get(idx).map(String::as_str).unwrap_or("");
                put_fixed_text(dst, text, MAX_ENUM_STRING_SIZE);
            }
            return Ok(());
        }
        ScalarKind::Float | ScalarKind::Double => {
            dst.put_i16_ne(record.precision.unwrap_or(0));
            dst.put_i16_ne(0);
        }
        ScalarKind::Short | ScalarKind::Char | ScalarKind::Long => {}
    }

    put_fixed_text(dst, record.units.as_deref().unwrap_or(""), MAX_UNITS_SIZE);

    let zero = Scalar::zero(kind);
    let limits = record.limits.clone().unwrap_or_else(|| GraphicLimits {
        upper_disp_limit: zero.clone(),
        lower_disp_limit: zero.clone(),
        upper_alarm_limit: zero.clone(),
        upper_warning_limit: zero.clone(),
        lower_warning_limit: zero.clone(),
        lower_alarm_limit: zero.clone(),
    });
    for limit in [
        &limits.upper_disp_limit,
        &limits.lower_disp_limit,
        &limits.upper_alarm_limit,
        &limits.upper_warning_limit,
        &limits.lower_warning_limit,
        &limits.lower_alarm_limit,
    ] {
        put_scalar(kind, limit, dst)?;
    }

    if desc.family.has_control() {
        match &record.control {
            Some(control) => {
                put_scalar(kind, &control.upper_ctrl_limit, dst)?;
                put_scalar(kind, &control.lower_ctrl_limit, dst)?;
            }
            None => {
                put_scalar(kind, &zero, dst)?;
                put_scalar(kind, &zero, dst)?;
            }
        }
    }
    Ok(())
}

fn put_scalar(kind: ScalarKind, scalar: &Scalar, dst: &mut BytesMut) -> Result<()> {
    match scalar.convert(kind)? {
        Scalar::Text(text) => put_fixed_text(dst, &text, MAX_STRING_SIZE),
        Scalar::Short(v) => dst.put_i16_ne(v),
        Scalar::Float(v) => dst.put_f32_ne(v),
        Scalar::Enum(v) => dst.put_u16_ne(v),
        Scalar::Char(v) => dst.put_u8(v),
        Scalar::Long(v) => dst.put_i32_ne(v),
        Scalar::Double(v) => dst.put_f64_ne(v),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{decode, DecodeOptions};
    use crate::value::Value;

    fn target(field_type: FieldType, native_count: usize) -> PutTarget {
        PutTarget {
            field_type,
            native_count,
        }
    }

    #[test]
    fn scalar_write_uses_native_type() {
        let put = prepare_put(
            target(FieldType::Double, 1),
            &PutRequest::default(),
            &PutValue::from(12.3),
        )
        .unwrap();
        assert_eq!(put.dbr_type, DbrType::Double);
        assert_eq!(put.count, 1);
        assert_eq!(put.buffer.as_ref(), &12.3f64.to_ne_bytes());
    }

    #[test]
    fn sequence_write_takes_three_way_minimum() {
        let value = PutValue::from(vec![1.0, 2.0, 3.0, 4.0, 5.0]);

        let put = prepare_put(target(FieldType::Double, 20), &PutRequest::default(), &value)
            .unwrap();
        assert_eq!(put.count, 5);
        assert_eq!(put.buffer.len(), 40);

        let put = prepare_put(
            target(FieldType::Double, 20),
            &PutRequest::default().with_count(3),
            &value,
        )
        .unwrap();
        assert_eq!(put.count, 3);

        let put = prepare_put(
            target(FieldType::Double, 2),
            &PutRequest::default().with_count(10),
            &value,
        )
        .unwrap();
        assert_eq!(put.count, 2);
    }

    #[test]
    fn reject_policy_refuses_long_writes() {
        let value = PutValue::from(vec![1.0, 2.0, 3.0]);
        let request = PutRequest::default().with_policy(PutLengthPolicy::Reject);

        let err = prepare_put(target(FieldType::Double, 2), &request, &value).unwrap_err();
        assert_eq!(
            err,
            DbrError::TooManyElements {
                supplied: 3,
                allowed: 2
            }
        );
        assert!(prepare_put(target(FieldType::Double, 3), &request, &value).is_ok());
    }

    #[test]
    fn text_to_enum_field_becomes_string_request() {
        let put = prepare_put(
            target(FieldType::Enum, 1),
            &PutRequest::default(),
            &PutValue::from("Busy"),
        )
        .unwrap();
        assert_eq!(put.dbr_type, DbrType::String);
        assert_eq!(put.buffer.len(), MAX_STRING_SIZE);
        assert_eq!(&put.buffer[..5], b"Busy\0");
    }

    #[test]
    fn text_to_char_field_becomes_terminated_bytes() {
        let put = prepare_put(
            target(FieldType::Char, 64),
            &PutRequest::default(),
            &PutValue::from("abc"),
        )
        .unwrap();
        assert_eq!(put.dbr_type, DbrType::Char);
        assert_eq!(put.count, 4);
        assert_eq!(put.buffer.as_ref(), b"abc\0");
    }

    #[test]
    fn text_to_numeric_field_parses_or_fails() {
        let put = prepare_put(
            target(FieldType::Long, 1),
            &PutRequest::default(),
            &PutValue::from("17"),
        )
        .unwrap();
        assert_eq!(put.buffer.as_ref(), &17i32.to_ne_bytes());

        let err = prepare_put(
            target(FieldType::Double, 1),
            &PutRequest::default(),
            &PutValue::from("not a number"),
        )
        .unwrap_err();
        assert!(matches!(err, DbrError::TypeMismatch { .. }));
    }

    #[test]
    fn disconnected_channel_has_no_default_type() {
        let err = prepare_put(
            target(FieldType::NotConnected, 0),
            &PutRequest::default(),
            &PutValue::from(1.0),
        )
        .unwrap_err();
        assert_eq!(err, DbrError::InvalidType(-1));
    }

    #[test]
    fn metadata_types_are_not_writable() {
        let err = prepare_put(
            target(FieldType::Double, 1),
            &PutRequest::default().with_type(DbrType::CtrlDouble),
            &PutValue::from(1.0),
        )
        .unwrap_err();
        assert_eq!(err, DbrError::NotWritable(DbrType::CtrlDouble));
    }

    #[test]
    fn empty_sequence_is_rejected() {
        let err = prepare_put(
            target(FieldType::Double, 4),
            &PutRequest::default(),
            &PutValue::Sequence(Vec::new()),
        )
        .unwrap_err();
        assert_eq!(err, DbrError::Empty);
    }

    #[test]
    fn ack_writes_are_plain_u16() {
        let put = prepare_put(
            target(FieldType::Double, 1),
            &PutRequest::default().with_type(DbrType::PutAcks),
            &PutValue::from(2u16),
        )
        .unwrap();
        assert_eq!(put.buffer.as_ref(), &2u16.to_ne_bytes());
    }

    #[test]
    fn record_encoding_pads_to_value_offset() {
        let mut record = DbrRecord::new(DbrType::TimeDouble, Value::Scalar(Scalar::Double(2.5)));
        record.status = 4;
        record.severity = 1;
        let bytes = encode_record(&record, 1).unwrap();
        assert_eq!(bytes.len(), 24);

        let decoded = decode(DbrType::TimeDouble, 1, &bytes, &DecodeOptions::default()).unwrap();
        let back = decoded.record().unwrap();
        assert_eq!(back.status, 4);
        assert_eq!(back.severity, 1);
        assert_eq!(back.value, Value::Scalar(Scalar::Double(2.5)));
    }
}
