//! Wire frames for calls and casts between nodes
//!
//! A frame is an operation name plus a bincode payload. Decoding never fails
//! on an operation name it does not know: the frame becomes
//! `Call::Unknown`/`Cast::Unknown` and the coordinator decides what to do.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{PgError, PgResult};
use crate::transport::{Call, Cast};

pub const JOIN: &str = "join";
pub const LEAVE: &str = "leave";
pub const APPLY_JOIN: &str = "apply_join";
pub const APPLY_LEAVE: &str = "apply_leave";

/// Tagged, encoded operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Operation name
    pub op: String,
    /// Bincode-encoded arguments
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn to_bytes(&self) -> PgResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> PgResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn bare(op: &str) -> Self {
        Frame { op: op.to_string(), payload: Vec::new() }
    }
}

fn payload<T: DeserializeOwned>(frame: &Frame) -> PgResult<T> {
    bincode::deserialize(&frame.payload)
        .map_err(|err| PgError::Codec(format!("bad {} payload: {}", frame.op, err)))
}

/// Encode a call
pub fn encode_call<G, P, M>(call: &Call<G, P, M>) -> PgResult<Frame>
where
    G: Serialize,
    P: Serialize,
    M: Serialize,
{
    let payload = match call {
        Call::Join { group, pid, meta } => bincode::serialize(&(group, pid, meta))?,
        Call::Leave { group, pid } => bincode::serialize(&(group, pid))?,
        Call::Unknown(op) => return Ok(Frame::bare(op)),
    };
    Ok(Frame { op: call.op().to_string(), payload })
}

/// Decode a call; unknown operation names are not an error
pub fn decode_call<G, P, M>(frame: &Frame) -> PgResult<Call<G, P, M>>
where
    G: DeserializeOwned,
    P: DeserializeOwned,
    M: DeserializeOwned,
{
    match frame.op.as_str() {
        JOIN => {
            let (group, pid, meta) = payload(frame)?;
            Ok(Call::Join { group, pid, meta })
        }
        LEAVE => {
            let (group, pid) = payload(frame)?;
            Ok(Call::Leave { group, pid })
        }
        other => Ok(Call::Unknown(other.to_string())),
    }
}

/// Encode a cast
pub fn encode_cast<G, P, M>(cast: &Cast<G, P, M>) -> PgResult<Frame>
where
    G: Serialize,
    P: Serialize,
    M: Serialize,
{
    let payload = match cast {
        Cast::ApplyJoin { group, pid, meta } => bincode::serialize(&(group, pid, meta))?,
        Cast::ApplyLeave { group, pid } => bincode::serialize(&(group, pid))?,
        Cast::Unknown(op) => return Ok(Frame::bare(op)),
    };
    Ok(Frame { op: cast.op().to_string(), payload })
}

/// Decode a cast; unknown operation names are not an error
pub fn decode_cast<G, P, M>(frame: &Frame) -> PgResult<Cast<G, P, M>>
where
    G: DeserializeOwned,
    P: DeserializeOwned,
    M: DeserializeOwned,
{
    match frame.op.as_str() {
        APPLY_JOIN => {
            let (group, pid, meta) = payload(frame)?;
            Ok(Cast::ApplyJoin { group, pid, meta })
        }
        APPLY_LEAVE => {
            let (group, pid) = payload(frame)?;
            Ok(Cast::ApplyLeave { group, pid })
        }
        other => Ok(Cast::Unknown(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeId, Pid};

    type TestCall = Call<String, Pid, String>;
    type TestCast = Cast<String, Pid, String>;

    #[test]
    fn test_join_frame_through_bytes() {
        let pid = Pid::spawn_on(NodeId::new());
        let call: TestCall = Call::Join {
            group: "workers".to_string(),
            pid,
            meta: Some("shard-3".to_string()),
        };

        let bytes = encode_call(&call).unwrap().to_bytes().unwrap();
        let frame = Frame::from_bytes(&bytes).unwrap();
        assert_eq!(frame.op, JOIN);
        assert_eq!(decode_call::<String, Pid, String>(&frame).unwrap(), call);
    }

    #[test]
    fn test_unknown_op_decodes_as_unknown() {
        let frame = Frame { op: "join_v2".to_string(), payload: vec![1, 2, 3] };

        let call: TestCall = decode_call(&frame).unwrap();
        assert_eq!(call, Call::Unknown("join_v2".to_string()));

        let cast: TestCast = decode_cast(&frame).unwrap();
        assert_eq!(cast, Cast::Unknown("join_v2".to_string()));
    }

    #[test]
    fn test_truncated_payload_is_codec_error() {
        let pid = Pid::spawn_on(NodeId::new());
        let cast: TestCast = Cast::ApplyLeave { group: "workers".to_string(), pid };
        let mut frame = encode_cast(&cast).unwrap();
        assert_eq!(frame.op, APPLY_LEAVE);

        frame.payload.truncate(3);
        let decoded: PgResult<TestCast> = decode_cast(&frame);
        assert!(matches!(decoded, Err(PgError::Codec(_))));
    }

    #[test]
    fn test_unknown_encodes_bare() {
        let cast: TestCast = Cast::Unknown("sync".to_string());
        let frame = encode_cast(&cast).unwrap();
        assert_eq!(frame, Frame { op: "sync".to_string(), payload: Vec::new() });
    }
}
