//! Conversions of primitive values to declared attribute datatypes.
//!
//! Rules:
//! - identical types pass through, as do `Null` and anything cast to `Any`;
//! - booleans never convert to or from another type;
//! - numeric ↔ numeric conversions truncate like primitive `as` casts;
//! - `char` ↔ numeric conversions go through the UTF-16 code unit;
//! - lists are cast element-wise.

use crate::{DataType, ModelError, Value};

/// Datatype a primitive value already has, if any.
pub(crate) fn datatype_of(value: &Value) -> Option<DataType> {
    Some(match value {
        Value::Bool(_) => DataType::Boolean,
        Value::Byte(_) => DataType::Byte,
        Value::Short(_) => DataType::Short,
        Value::Int(_) => DataType::Int,
        Value::Long(_) => DataType::Long,
        Value::Float(_) => DataType::Float,
        Value::Double(_) => DataType::Double,
        Value::Char(_) => DataType::Char,
        Value::String(_) => DataType::String,
        _ => return None,
    })
}

/// Whether a value of datatype `from` can be cast to `to`.
pub fn can_cast(from: DataType, to: DataType) -> bool {
    if from == to || to == DataType::Any {
        return true;
    }
    let convertible = |t: DataType| t.is_numeric() || t == DataType::Char;
    convertible(from) && convertible(to)
}

pub fn cast(value: &Value, to: DataType) -> Result<Value, ModelError> {
    if let Value::List(items) = value {
        return items
            .iter()
            .map(|item| cast(item, to))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List);
    }
    if value.is_null() || to == DataType::Any {
        return Ok(value.clone());
    }

    let cast_error = || ModelError::Cast {
        from: value.type_name().to_string(),
        to: to.name().to_string(),
    };

    let Some(from) = datatype_of(value) else {
        return Err(cast_error());
    };
    if from == to {
        return Ok(value.clone());
    }
    if !can_cast(from, to) {
        return Err(cast_error());
    }

    if let Value::Char(c) = value {
        let unit = *c as u32 as u16;
        return Ok(numeric_from_i64(i64::from(unit), to));
    }

    if to == DataType::Char {
        let unit = match value {
            Value::Float(v) => *v as i32 as i16 as u16,
            Value::Double(v) => *v as i32 as i16 as u16,
            other => other.as_i64().ok_or_else(cast_error)? as i16 as u16,
        };
        return char::from_u32(u32::from(unit))
            .map(Value::Char)
            .ok_or_else(cast_error);
    }

    Ok(match value {
        Value::Float(v) => numeric_from_f64(f64::from(*v), to),
        Value::Double(v) => numeric_from_f64(*v, to),
        other => numeric_from_i64(other.as_i64().ok_or_else(cast_error)?, to),
    })
}

fn numeric_from_i64(v: i64, to: DataType) -> Value {
    match to {
        DataType::Byte => Value::Byte(v as i8),
        DataType::Short => Value::Short(v as i16),
        DataType::Int => Value::Int(v as i32),
        DataType::Long => Value::Long(v),
        DataType::Float => Value::Float(v as f32),
        DataType::Double => Value::Double(v as f64),
        _ => Value::Long(v),
    }
}

fn numeric_from_f64(v: f64, to: DataType) -> Value {
    match to {
        DataType::Byte => Value::Byte(v as i32 as i8),
        DataType::Short => Value::Short(v as i32 as i16),
        DataType::Int => Value::Int(v as i32),
        DataType::Long => Value::Long(v as i64),
        DataType::Float => Value::Float(v as f32),
        DataType::Double => Value::Double(v),
        _ => Value::Double(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_types_pass_through() {
        assert_eq!(cast(&Value::Int(7), DataType::Int).unwrap(), Value::Int(7));
        assert_eq!(
            cast(&Value::from("x"), DataType::String).unwrap(),
            Value::from("x")
        );
        assert_eq!(
            cast(&Value::Bool(true), DataType::Boolean).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn numeric_conversions_truncate() {
        assert_eq!(cast(&Value::Double(3.9), DataType::Int).unwrap(), Value::Int(3));
        assert_eq!(cast(&Value::Int(300), DataType::Byte).unwrap(), Value::Byte(44));
        assert_eq!(
            cast(&Value::Int(2), DataType::Double).unwrap(),
            Value::Double(2.0)
        );
        assert_eq!(
            cast(&Value::Long(5), DataType::Float).unwrap(),
            Value::Float(5.0)
        );
    }

    #[test]
    fn char_numeric_conversions() {
        assert_eq!(cast(&Value::Char('A'), DataType::Int).unwrap(), Value::Int(65));
        assert_eq!(cast(&Value::Int(97), DataType::Char).unwrap(), Value::Char('a'));
    }

    #[test]
    fn booleans_never_convert() {
        assert!(cast(&Value::Bool(true), DataType::Int).is_err());
        assert!(cast(&Value::Int(1), DataType::Boolean).is_err());
        assert!(!can_cast(DataType::Boolean, DataType::Long));
    }

    #[test]
    fn strings_do_not_convert_to_numbers() {
        assert!(cast(&Value::from("1"), DataType::Int).is_err());
        assert!(cast(&Value::Int(1), DataType::String).is_err());
    }

    #[test]
    fn lists_cast_element_wise_and_null_passes() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(
            cast(&list, DataType::Long).unwrap(),
            Value::List(vec![Value::Long(1), Value::Long(2)])
        );
        assert_eq!(cast(&Value::Null, DataType::Int).unwrap(), Value::Null);
        assert_eq!(cast(&Value::Int(4), DataType::Any).unwrap(), Value::Int(4));
    }
}
