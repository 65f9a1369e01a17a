use bytes::Buf;

use crate::catalog::{
    DbrType, Family, ScalarKind, TypeDescriptor, MAX_ENUM_STATES, MAX_ENUM_STRING_SIZE,
    MAX_STRING_SIZE, MAX_UNITS_SIZE,
};
use crate::error::{DbrError, Result};
use crate::record::{AckState, ControlLimits, DbrRecord, Decoded, GraphicLimits, TimeStamp};
use crate::value::{get_fixed_text, NumericArray, Scalar, Value};

/// Controls how decoded values are represented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Decode numeric arrays into a contiguous [`NumericArray`] instead of a
    /// sequence of scalars.
    pub numeric_array: bool,
}

/// Decode `count` elements of `dbr_type` from a native buffer.
///
/// Reads at most `value_offset + count * element_size` bytes; a shorter
/// buffer fails with [`DbrError::BufferTooShort`]. Plain types decode to a
/// bare value; every other family decodes to a [`DbrRecord`].
pub fn decode(
    dbr_type: DbrType,
    count: usize,
    src: &[u8],
    options: &DecodeOptions,
) -> Result<Decoded> {
    let desc = dbr_type.descriptor();
    let need = desc.span_for(count);
    if src.len() < need {
        return Err(DbrError::BufferTooShort {
            dbr_type,
            count,
            len: src.len(),
            need,
        });
    }

    let value = decode_value(desc.kind, count, &src[desc.value_offset..need], options);
    if desc.family == Family::Plain {
        return Ok(Decoded::Plain(value));
    }

    let mut record = DbrRecord::new(dbr_type, value);
    read_header(desc, &src[..desc.value_offset], &mut record);
    Ok(Decoded::Record(record))
}

/// Decode from a raw identifier, as delivered by the native library.
pub fn decode_raw(
    raw_type: i64,
    count: usize,
    src: &[u8],
    options: &DecodeOptions,
) -> Result<Decoded> {
    decode(DbrType::from_raw(raw_type)?, count, src, options)
}

fn read_header(desc: &TypeDescriptor, mut buf: &[u8], record: &mut DbrRecord) {
    record.status = buf.get_u16_ne();
    record.severity = buf.get_u16_ne();

    match desc.family {
        Family::Plain | Family::Status => {}
        Family::StatusAck => {
            record.ack = Some(AckState {
                ackt: buf.get_u16_ne(),
                acks: buf.get_u16_ne(),
            });
        }
        Family::Time => {
            record.stamp = Some(TimeStamp {
                sec_past_epoch: buf.get_u32_ne(),
                nsec: buf.get_u32_ne(),
            });
        }
        Family::Graphic | Family::Control => read_graphic(desc, buf, record),
    }
}

fn read_graphic(desc: &TypeDescriptor, mut buf: &[u8], record: &mut DbrRecord) {
    let kind = desc.kind;
    match kind {
        // gr/ctrl strings share the sts layout
        ScalarKind::String => return,
        ScalarKind::Enum => {
            let no_str = usize::try_from(buf.get_i16_ne())
                .unwrap_or(0)
                .min(MAX_ENUM_STATES);
            let strings = (0..no_str)
                .map(|idx| {
                    let start = idx * MAX_ENUM_STRING_SIZE;
                    get_fixed_text(&buf[start..start + MAX_ENUM_STRING_SIZE])
                })
                .collect();
            record.enum_strings = Some(strings);
            return;
        }
        ScalarKind::Float | ScalarKind::Double => {
            record.precision = Some(buf.get_i16_ne());
            buf.advance(2);
        }
        ScalarKind::Short | ScalarKind::Char | ScalarKind::Long => {}
    }

    record.units = Some(get_fixed_text(&buf[..MAX_UNITS_SIZE]));
    buf.advance(MAX_UNITS_SIZE);

    record.limits = Some(GraphicLimits {
        upper_disp_limit: get_scalar(kind, &mut buf),
        lower_disp_limit: get_scalar(kind, &mut buf),
        upper_alarm_limit: get_scalar(kind, &mut buf),
        upper_warning_limit: get_scalar(kind, &mut buf),
        lower_warning_limit: get_scalar(kind, &mut buf),
        lower_alarm_limit: get_scalar(kind, &mut buf),
    });
    if desc.family.has_control() {
        record.control = Some(ControlLimits {
            upper_ctrl_limit: get_scalar(kind, &mut buf),
            lower_ctrl_limit: get_scalar(kind, &mut buf),
        });
    }
}

fn decode_value(kind: ScalarKind, count: usize, mut src: &[u8], options: &DecodeOptions) -> Value {
    if count == 1 {
        return Value::Scalar(get_scalar(kind, &mut src));
    }
    if options.numeric_array {
        if let Some(array) = copy_array(kind, count, src) {
            return Value::Array(array);
        }
    }
    Value::Sequence((0..count).map(|_| get_scalar(kind, &mut src)).collect())
}

pub(crate) fn get_scalar(kind: ScalarKind, buf: &mut &[u8]) -> Scalar {
    match kind {
        ScalarKind::String => {
            let text = get_fixed_text(&buf[..MAX_STRING_SIZE]);
            buf.advance(MAX_STRING_SIZE);
            Scalar::Text(text)
        }
        ScalarKind::Short => Scalar::Short(buf.get_i16_ne()),
        ScalarKind::Float => Scalar::Float(buf.get_f32_ne()),
        ScalarKind::Enum => Scalar::Enum(buf.get_u16_ne()),
        ScalarKind::Char => Scalar::Char(buf.get_u8()),
        ScalarKind::Long => Scalar::Long(buf.get_i32_ne()),
        ScalarKind::Double => Scalar::Double(buf.get_f64_ne()),
    }
}

fn copy_array(kind: ScalarKind, count: usize, src: &[u8]) -> Option<NumericArray> {
    let array = match kind {
        ScalarKind::String => return None,
        ScalarKind::Short => NumericArray::Short(copy_elements(src, count)),
        ScalarKind::Float => NumericArray::Float(copy_elements(src, count)),
        ScalarKind::Enum => NumericArray::Enum(copy_elements(src, count)),
        ScalarKind::Char => NumericArray::Char(copy_elements(src, count)),
        ScalarKind::Long => NumericArray::Long(copy_elements(src, count)),
        ScalarKind::Double => NumericArray::Double(copy_elements(src, count)),
    };
    Some(array)
}

mod sealed {
    /// Element types valid for every bit pattern.
    pub trait Plain: Copy + Default {}

    impl Plain for i16 {}
    impl Plain for u16 {}
    impl Plain for u8 {}
    impl Plain for i32 {}
    impl Plain for f32 {}
    impl Plain for f64 {}
}

fn copy_elements<T: sealed::Plain>(src: &[u8], count: usize) -> Vec<T> {
    let len = count * std::mem::size_of::<T>();
    let src = &src[..len];
    let mut out = vec![T::default(); count];
    // SAFETY: `out` holds `count` initialized elements, so its allocation spans
    // `len` bytes, and `src` is exactly `len` bytes. `T` is a primitive number
    // valid for every bit pattern. The regions belong to different allocations.
    unsafe {
        std::ptr::copy_nonoverlapping(src.as_ptr(), out.as_mut_ptr().cast::<u8>(), len);
    }
    out
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;

    fn ctrl_double_buffer() -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u16_ne(0); // status
        buf.put_u16_ne(0); // severity
        buf.put_i16_ne(4); // precision
        buf.put_i16_ne(0); // pad
        buf.put_slice(b"mm\0\0\0\0\0\0");
        for limit in [20.0, -20.0, 20.0, 10.0, -10.0, -20.0, 0.0, 0.0] {
            buf.put_f64_ne(limit);
        }
        buf.put_f64_ne(1.0);
        buf
    }

    #[test]
    fn decodes_ctrl_double_fields() {
        let buf = ctrl_double_buffer();
        assert_eq!(buf.len(), 88);

        let decoded = decode(DbrType::CtrlDouble, 1, &buf, &DecodeOptions::default()).unwrap();
        let record = decoded.record().unwrap();
        assert_eq!(record.precision, Some(4));
        assert_eq!(record.units.as_deref(), Some("mm"));
        let limits = record.limits.as_ref().unwrap();
        assert_eq!(limits.upper_disp_limit, Scalar::Double(20.0));
        assert_eq!(limits.lower_warning_limit, Scalar::Double(-10.0));
        assert_eq!(
            record.control.as_ref().unwrap().upper_ctrl_limit,
            Scalar::Double(0.0)
        );
        assert_eq!(record.value, Value::Scalar(Scalar::Double(1.0)));
        assert!(record.stamp.is_none());
        assert!(record.enum_strings.is_none());
    }

    #[test]
    fn never_reads_past_requested_elements() {
        let mut buf = BytesMut::new();
        buf.put_f64_ne(1.0);
        buf.put_f64_ne(2.0);
        // trailing garbage beyond count is ignored
        buf.put_slice(&[0xff; 5]);

        let decoded = decode(DbrType::Double, 2, &buf, &DecodeOptions::default()).unwrap();
        assert_eq!(
            decoded.value(),
            &Value::Sequence(vec![Scalar::Double(1.0), Scalar::Double(2.0)])
        );

        let short = decode(DbrType::Double, 3, &buf[..16], &DecodeOptions::default());
        assert!(matches!(
            short,
            Err(DbrError::BufferTooShort { need: 24, len: 16, .. })
        ));
    }

    #[test]
    fn enum_state_count_is_independent_of_element_count() {
        let mut buf = BytesMut::new();
        buf.put_u16_ne(0);
        buf.put_u16_ne(0);
        buf.put_i16_ne(2);
        for state in ["Done", "Busy"] {
            crate::value::put_fixed_text(&mut buf, state, MAX_ENUM_STRING_SIZE);
        }
        for _ in 2..MAX_ENUM_STATES {
            crate::value::put_fixed_text(&mut buf, "stale", MAX_ENUM_STRING_SIZE);
        }
        buf.put_u16_ne(1);
        buf.put_u16_ne(0);
        buf.put_u16_ne(1);

        let decoded = decode(DbrType::GrEnum, 3, &buf, &DecodeOptions::default()).unwrap();
        let record = decoded.record().unwrap();
        assert_eq!(
            record.enum_strings.as_deref(),
            Some(&["Done".to_string(), "Busy".to_string()][..])
        );
        assert_eq!(record.value.len(), 3);
    }

    #[test]
    fn numeric_array_matches_sequence_decode() {
        let mut buf = BytesMut::new();
        for v in [1i32, -2, 3, i32::MAX] {
            buf.put_i32_ne(v);
        }
        let array = decode(
            DbrType::Long,
            4,
            &buf,
            &DecodeOptions {
                numeric_array: true,
            },
        )
        .unwrap();
        let sequence = decode(DbrType::Long, 4, &buf, &DecodeOptions::default()).unwrap();

        assert_eq!(
            array.value(),
            &Value::Array(NumericArray::Long(vec![1, -2, 3, i32::MAX]))
        );
        assert_eq!(array.value().to_scalars(), sequence.value().to_scalars());
    }

    #[test]
    fn numeric_array_does_not_apply_to_strings() {
        let mut buf = BytesMut::new();
        crate::value::put_fixed_text(&mut buf, "a", MAX_STRING_SIZE);
        crate::value::put_fixed_text(&mut buf, "b", MAX_STRING_SIZE);
        let decoded = decode(
            DbrType::String,
            2,
            &buf,
            &DecodeOptions {
                numeric_array: true,
            },
        )
        .unwrap();
        assert_eq!(
            decoded.value(),
            &Value::Sequence(vec![Scalar::from("a"), Scalar::from("b")])
        );
    }

    #[test]
    fn zero_count_yields_empty_sequence() {
        let buf = [0u8; 16];
        let decoded = decode(DbrType::TimeDouble, 0, &buf, &DecodeOptions::default()).unwrap();
        assert!(decoded.value().is_empty());
        assert!(decoded.record().unwrap().stamp.is_some());
    }

    #[test]
    fn raw_identifiers_are_validated() {
        assert_eq!(
            decode_raw(99, 1, &[0; 8], &DecodeOptions::default()),
            Err(DbrError::InvalidType(99))
        );
    }
}
