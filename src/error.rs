use serde::{de, Deserialize, Serialize};
use serde_json;
use std::error;
use std::fmt;

/// Failure taxonomy of a resolution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or contradictory options. Fatal before any dataset is read.
    Configuration,
    /// An input, ground-truth or output path could not be opened.
    ResourceNotFound,
    /// A dataset yielded no usable rows.
    MalformedRecord,
    Internal,
}

impl ErrorKind {
    /// Process exit code reported for this kind of failure.
    pub fn code(&self) -> u8 {
        match self {
            ErrorKind::Internal => 1,
            ErrorKind::Configuration => 2,
            ErrorKind::ResourceNotFound => 3,
            ErrorKind::MalformedRecord => 4,
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.code())
    }
}

struct ErrorCodeVisitor;

impl<'de> de::Visitor<'de> for ErrorCodeVisitor {
    type Value = ErrorKind;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("ErrorKind")
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            1 => Ok(ErrorKind::Internal),
            2 => Ok(ErrorKind::Configuration),
            3 => Ok(ErrorKind::ResourceNotFound),
            4 => Ok(ErrorKind::MalformedRecord),
            value => Err(de::Error::custom(value.to_string())),
        }
    }
}

impl<'de> de::Deserialize<'de> for ErrorKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_u8(ErrorCodeVisitor)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceError {
    pub msg: String,
    pub kind: ErrorKind,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let json = serde_json::to_string(&self).map_err(|_| fmt::Error)?;
        write!(f, "{}", json)
    }
}

impl error::Error for ServiceError {}

impl ServiceError {
    pub fn configuration<T: std::fmt::Display>(msg: T) -> ServiceError {
        ServiceError {
            msg: msg.to_string(),
            kind: ErrorKind::Configuration,
        }
    }

    pub fn resource_not_found<T: std::fmt::Display>(msg: T) -> ServiceError {
        ServiceError {
            msg: msg.to_string(),
            kind: ErrorKind::ResourceNotFound,
        }
    }

    pub fn malformed_record<T: std::fmt::Display>(msg: T) -> ServiceError {
        ServiceError {
            msg: msg.to_string(),
            kind: ErrorKind::MalformedRecord,
        }
    }

    pub fn internal<T: std::fmt::Display>(msg: T) -> ServiceError {
        ServiceError {
            msg: msg.to_string(),
            kind: ErrorKind::Internal,
        }
    }
}
