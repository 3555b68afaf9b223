use crate::errors::{LinkError, LinkResult};

/// Status codes carried in the payload of response packets.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Code {
    Ok,
    NotFoundSession,
    NotFoundUser,
    InternalError,
    InvalidArgument,
    IllegalRequest,
}

impl Code {
    #[inline]
    pub fn to_u16(self) -> u16 {
        match self {
            Code::Ok => 0,
            Code::NotFoundSession => 1,
            Code::NotFoundUser => 2,
            Code::InternalError => 3,
            Code::InvalidArgument => 4,
            Code::IllegalRequest => 5,
        }
    }

    /// Codes outside the known set decode as `InternalError`.
    #[inline]
    pub fn from_u16(value: u16) -> Code {
        match value {
            0 => Code::Ok,
            1 => Code::NotFoundSession,
            2 => Code::NotFoundUser,
            3 => Code::InternalError,
            4 => Code::InvalidArgument,
            5 => Code::IllegalRequest,
            _ => Code::InternalError,
        }
    }

    /// Maps the code of a completed call to a result. `Ok` is success, any
    /// other code surfaces as a remote error.
    #[inline]
    pub fn into_result(self) -> LinkResult<()> {
        match self {
            Code::Ok => Ok(()),
            code => Err(LinkError::Remote(code)),
        }
    }

    /// Derives the response code for a provider-side error.
    pub fn from_error(err: &LinkError) -> Code {
        match err {
            LinkError::NotFoundSession => Code::NotFoundSession,
            LinkError::NotFoundUserLocation => Code::NotFoundUser,
            LinkError::InvalidMessage | LinkError::InvalidNid => Code::InvalidArgument,
            LinkError::IllegalRequest => Code::IllegalRequest,
            LinkError::Remote(code) => *code,
            _ => Code::InternalError,
        }
    }
}

impl From<u16> for Code {
    #[inline]
    fn from(value: u16) -> Code {
        Code::from_u16(value)
    }
}
