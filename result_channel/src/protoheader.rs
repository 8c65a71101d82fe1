//! The 256-byte protoheader envelope, grounded on `proto/ProtoHeaderWrap.{h,cc}`.
//!
//! Every message on the wire is preceded by a fixed-size envelope: one length byte, that many
//! bytes of serialized protoheader, then zero-padded (with ASCII `'0'`, per §6) out to
//! [`qserv_types::PROTOHEADER_ENVELOPE_SIZE`]. The first message's envelope travels as transport
//! metadata; every later one is appended to the *previous* message's payload.

use md5::{Digest, Md5};
use qserv_types::{ProtoCodec, ProtoCodecError, ProtoHeader, PROTOHEADER_ENVELOPE_SIZE, PROTOHEADER_MAX_SIZE};
use snafu::{ResultExt, Snafu};

/// MD5 digest of `payload`, as carried by [`ProtoHeader::md5`].
pub fn payload_md5(payload: &[u8]) -> [u8; 16] {
    Md5::digest(payload).into()
}

/// Errors from wrapping or unwrapping a protoheader envelope.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum Error {
    /// The codec produced a serialized header larger than the envelope can carry.
    #[snafu(display(
        "serialized protoheader is {actual} bytes, larger than the {max} byte envelope budget"
    ))]
    HeaderTooLarge {
        /// The codec's actual output size.
        actual: usize,
        /// [`PROTOHEADER_MAX_SIZE`].
        max: usize,
    },
    /// The envelope's declared length byte disagreed with the bytes available.
    #[snafu(display("envelope declares {declared} header bytes but only {available} are present"))]
    Truncated {
        /// The length byte read from the envelope.
        declared: usize,
        /// Bytes actually available after the length byte.
        available: usize,
    },
    /// The codec could not parse the header bytes.
    #[snafu(display("protoheader decode failed: {source}"))]
    Decode {
        /// The underlying codec error.
        source: ProtoCodecError,
    },
}

/// Serialize `header` via `codec` and wrap it in the fixed-size envelope: `[len][header bytes]
/// [zero-padding to 256 bytes]`, using ASCII `'0'` as the pad byte per §6.
pub fn wrap(codec: &dyn ProtoCodec, header: &ProtoHeader) -> Result<[u8; PROTOHEADER_ENVELOPE_SIZE], Error> {
    let encoded = codec.encode_header(header);
    if encoded.len() > PROTOHEADER_MAX_SIZE {
        return Err(Error::HeaderTooLarge {
            actual: encoded.len(),
            max: PROTOHEADER_MAX_SIZE,
        });
    }
    let mut envelope = [b'0'; PROTOHEADER_ENVELOPE_SIZE];
    envelope[0] = encoded.len() as u8;
    envelope[1..1 + encoded.len()].copy_from_slice(&encoded);
    Ok(envelope)
}

/// Recover the protoheader from a wrapped envelope, verifying the fixed size and the declared
/// length byte before handing the header bytes to `codec`.
pub fn unwrap(codec: &dyn ProtoCodec, envelope: &[u8]) -> Result<ProtoHeader, Error> {
    let declared = envelope[0] as usize;
    let available = envelope.len().saturating_sub(1);
    if declared > available {
        return Err(Error::Truncated { declared, available });
    }
    let header_bytes = &envelope[1..1 + declared];
    codec.decode_header(header_bytes).context(DecodeSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qserv_types::ProtoHeader;

    #[derive(Debug, Default)]
    struct EchoCodec;

    impl ProtoCodec for EchoCodec {
        fn encode_header(&self, header: &ProtoHeader) -> Vec<u8> {
            // A trivial, deterministic stand-in for the real protobuf wire format: good enough
            // to exercise the envelope framing logic, which is agnostic to the codec's choices.
            let mut buf = Vec::new();
            buf.extend_from_slice(&header.protocol.to_le_bytes());
            buf.extend_from_slice(&header.size.to_le_bytes());
            buf.extend_from_slice(&header.md5);
            buf.push(header.endnodata as u8);
            let name = header.wname.as_bytes();
            buf.push(name.len() as u8);
            buf.extend_from_slice(name);
            buf
        }

        fn decode_header(&self, bytes: &[u8]) -> Result<ProtoHeader, ProtoCodecError> {
            if bytes.len() < 4 + 4 + 16 + 1 + 1 {
                return Err(ProtoCodecError::Malformed("truncated header".into()));
            }
            let protocol = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
            let size = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
            let md5 = bytes[8..24].try_into().unwrap();
            let endnodata = bytes[24] != 0;
            let name_len = bytes[25] as usize;
            let wname = String::from_utf8_lossy(&bytes[26..26 + name_len]).into_owned();
            Ok(ProtoHeader {
                protocol,
                size,
                md5,
                wname,
                endnodata,
            })
        }

        fn encode_result(&self, _result: &qserv_types::ResultProto) -> Vec<u8> {
            Vec::new()
        }
    }

    fn sample_header() -> ProtoHeader {
        ProtoHeader {
            protocol: 2,
            size: 4096,
            md5: [7u8; 16],
            wname: "worker-07".into(),
            endnodata: false,
        }
    }

    #[test]
    fn envelope_is_exactly_256_bytes() {
        let envelope = wrap(&EchoCodec, &sample_header()).unwrap();
        assert_eq!(envelope.len(), PROTOHEADER_ENVELOPE_SIZE);
    }

    #[test]
    fn first_byte_equals_serialized_header_length() {
        let codec = EchoCodec;
        let header = sample_header();
        let encoded_len = codec.encode_header(&header).len();
        let envelope = wrap(&codec, &header).unwrap();
        assert_eq!(envelope[0] as usize, encoded_len);
    }

    #[test]
    fn padding_is_ascii_zero() {
        let codec = EchoCodec;
        let header = sample_header();
        let encoded_len = codec.encode_header(&header).len();
        let envelope = wrap(&codec, &header).unwrap();
        assert!(envelope[1 + encoded_len..].iter().all(|&b| b == b'0'));
    }

    #[test]
    fn round_trips_through_wrap_and_unwrap() {
        let codec = EchoCodec;
        let header = sample_header();
        let envelope = wrap(&codec, &header).unwrap();
        let decoded = unwrap(&codec, &envelope).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn payload_md5_is_deterministic() {
        assert_eq!(payload_md5(b"hello"), payload_md5(b"hello"));
        assert_ne!(payload_md5(b"hello"), payload_md5(b"world"));
    }

    #[test]
    fn oversized_header_is_rejected() {
        let codec = EchoCodec;
        let header = ProtoHeader {
            wname: "x".repeat(300),
            ..sample_header()
        };
        assert_matches::assert_matches!(wrap(&codec, &header), Err(Error::HeaderTooLarge { .. }));
    }
}
