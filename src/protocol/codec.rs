//! Synesthesia message codec (encode/decode)
//!
//! Every message is `[HEADER (20 bytes)] [PAYLOAD (header.length bytes)]`.
//! Payloads are written and read field by field; readers check the slice
//! length once per fixed block before consuming it, so a hostile length or
//! count can never read past the received buffer.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use bytes::{Buf, BufMut};

use super::{
    COLOUR_DATA_FIXED_SIZE, COLOUR_DATUM_SIZE, Capabilities, ColourDatum, ColourFrame,
    ConfigUpdate, DiscoveryRequest, DiscoveryResponse, ERROR_MESSAGE_CAPACITY, Error, ErrorCode,
    ErrorResponse, HEADER_SIZE, MAGIC_NUMBER, MAX_COLOURS_PER_MESSAGE, MAX_MESSAGE_SIZE, Message,
    MessageHeader, MessageType, NAME_CAPACITY, PATH_CAPACITY, Result,
};

const DISCOVERY_REQUEST_SIZE: usize = NAME_CAPACITY + 4;
const DISCOVERY_RESPONSE_SIZE: usize = NAME_CAPACITY + 4 + 2 + PATH_CAPACITY + 4;
const CONFIG_UPDATE_SIZE: usize = 20;
const ERROR_RESPONSE_SIZE: usize = 4 + ERROR_MESSAGE_CAPACITY;

/// Microseconds since a process-wide monotonic epoch
///
/// The epoch is fixed the first time this is called.
#[must_use]
pub fn timestamp_micros() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    u64::try_from(epoch.elapsed().as_micros()).unwrap_or(u64::MAX)
}

/// Per-sender sequence counter shared by every message kind
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU32);

impl SequenceCounter {
    /// Start counting from zero
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Take the next sequence number
    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// A decoded message together with its header
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Validated header
    pub header: MessageHeader,
    /// Decoded body
    pub message: Message,
}

fn begin(buf: &mut Vec<u8>, msg_type: MessageType, payload_len: usize, sequence: u32) {
    debug_assert!(HEADER_SIZE + payload_len <= MAX_MESSAGE_SIZE);
    let length = u16::try_from(payload_len).unwrap_or(u16::MAX);
    let header = MessageHeader::new(msg_type, length, sequence, timestamp_micros());
    buf.clear();
    buf.reserve(HEADER_SIZE + payload_len);
    buf.put_slice(&header.to_bytes());
}

/// Write `text` into a fixed field: at most `capacity - 1` bytes, nul padded.
fn put_text(buf: &mut Vec<u8>, text: &str, capacity: usize) {
    let mut end = text.len().min(capacity - 1);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    buf.put_slice(&text.as_bytes()[..end]);
    buf.put_bytes(0, capacity - end);
}

/// Read a fixed text field. The last byte is treated as a terminator no
/// matter what it holds.
fn get_text(buf: &mut &[u8], capacity: usize) -> String {
    let field = &buf[..capacity - 1];
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let text = String::from_utf8_lossy(&field[..end]).into_owned();
    buf.advance(capacity);
    text
}

fn put_datum(buf: &mut Vec<u8>, datum: &ColourDatum) {
    buf.put_f32_le(datum.frequency);
    buf.put_f32_le(datum.wavelength);
    buf.put_f32_le(datum.r);
    buf.put_f32_le(datum.g);
    buf.put_f32_le(datum.b);
    buf.put_f32_le(datum.magnitude);
    buf.put_f32_le(datum.phase);
}

fn get_datum(buf: &mut &[u8]) -> ColourDatum {
    ColourDatum {
        frequency: buf.get_f32_le(),
        wavelength: buf.get_f32_le(),
        r: buf.get_f32_le(),
        g: buf.get_f32_le(),
        b: buf.get_f32_le(),
        magnitude: buf.get_f32_le(),
        phase: buf.get_f32_le(),
    }
}

/// Encode a colour frame into `buf`, replacing its contents
///
/// Frames longer than [`MAX_COLOURS_PER_MESSAGE`] are truncated to that many
/// samples. The buffer keeps its allocation, so pooled buffers can be reused.
pub fn encode_colour_data_into(buf: &mut Vec<u8>, frame: &ColourFrame, sequence: u32) {
    let samples = &frame.samples[..frame.samples.len().min(MAX_COLOURS_PER_MESSAGE)];
    let payload_len = COLOUR_DATA_FIXED_SIZE + samples.len() * COLOUR_DATUM_SIZE;

    begin(buf, MessageType::ColourData, payload_len, sequence);
    buf.put_u32_le(frame.sample_rate);
    buf.put_u32_le(frame.fft_size);
    buf.put_u32_le(u32::try_from(samples.len()).unwrap_or(u32::MAX));
    buf.put_u64_le(frame.timestamp);
    for datum in samples {
        put_datum(buf, datum);
    }
}

/// Encode a colour frame
#[must_use]
pub fn encode_colour_data(frame: &ColourFrame, sequence: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_colour_data_into(&mut buf, frame, sequence);
    buf
}

/// Encode a discovery request
#[must_use]
pub fn encode_discovery_request(request: &DiscoveryRequest, sequence: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    begin(&mut buf, MessageType::DiscoveryRequest, DISCOVERY_REQUEST_SIZE, sequence);
    put_text(&mut buf, &request.client_name, NAME_CAPACITY);
    buf.put_u32_le(request.client_version);
    buf
}

/// Encode a discovery response
#[must_use]
pub fn encode_discovery_response(response: &DiscoveryResponse, sequence: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    begin(&mut buf, MessageType::DiscoveryResponse, DISCOVERY_RESPONSE_SIZE, sequence);
    put_text(&mut buf, &response.server_name, NAME_CAPACITY);
    buf.put_u32_le(response.server_version);
    buf.put_u16_le(response.ipc_port);
    put_text(&mut buf, &response.ipc_path, PATH_CAPACITY);
    buf.put_u32_le(response.capabilities.bits());
    buf
}

/// Encode a config update
#[must_use]
pub fn encode_config_update(config: &ConfigUpdate, sequence: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    begin(&mut buf, MessageType::ConfigUpdate, CONFIG_UPDATE_SIZE, sequence);
    buf.put_u32_le(u32::from(config.smoothing_enabled));
    buf.put_f32_le(config.smoothing_factor);
    buf.put_u32_le(config.colour_space);
    buf.put_u32_le(config.frequency_min);
    buf.put_u32_le(config.frequency_max);
    buf
}

/// Encode an error response
#[must_use]
pub fn encode_error(code: ErrorCode, message: &str, sequence: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    begin(&mut buf, MessageType::Error, ERROR_RESPONSE_SIZE, sequence);
    buf.put_u32_le(code.as_u32());
    put_text(&mut buf, message, ERROR_MESSAGE_CAPACITY);
    buf
}

/// Encode a ping (header only)
#[must_use]
pub fn encode_ping(sequence: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    begin(&mut buf, MessageType::Ping, 0, sequence);
    buf
}

/// Encode a pong (header only)
#[must_use]
pub fn encode_pong(sequence: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    begin(&mut buf, MessageType::Pong, 0, sequence);
    buf
}

/// Validate and parse the header at the start of `bytes`
///
/// # Errors
///
/// - [`Error::Truncated`] if fewer than [`HEADER_SIZE`] bytes are present, or
///   fewer than the header's declared total
/// - [`Error::BadMagic`] / [`Error::UnsupportedVersion`] on protocol mismatch
pub fn decode_header(bytes: &[u8]) -> Result<MessageHeader> {
    let header = MessageHeader::from_bytes(bytes)?;

    if bytes.len() < header.total_len() {
        return Err(Error::Truncated {
            needed: header.total_len(),
            got: bytes.len(),
        });
    }

    Ok(header)
}

const fn fixed_body_size(msg_type: MessageType) -> usize {
    match msg_type {
        MessageType::DiscoveryRequest => DISCOVERY_REQUEST_SIZE,
        MessageType::DiscoveryResponse => DISCOVERY_RESPONSE_SIZE,
        MessageType::ColourData => COLOUR_DATA_FIXED_SIZE,
        MessageType::ConfigUpdate => CONFIG_UPDATE_SIZE,
        MessageType::Ping | MessageType::Pong => 0,
        MessageType::Error => ERROR_RESPONSE_SIZE,
    }
}

/// Decode a payload of the given type
///
/// # Errors
///
/// Returns [`Error::Malformed`] if the payload is shorter than the type's
/// fixed size, or if a colour frame's declared count would overrun it.
pub fn decode_body(msg_type: MessageType, payload: &[u8]) -> Result<Message> {
    let needed = fixed_body_size(msg_type);
    if payload.len() < needed {
        return Err(Error::Malformed {
            message: msg_type,
            needed,
            got: payload.len(),
        });
    }

    let mut buf = payload;
    let message = match msg_type {
        MessageType::ColourData => {
            let sample_rate = buf.get_u32_le();
            let fft_size = buf.get_u32_le();
            let count = buf.get_u32_le() as usize;
            let timestamp = buf.get_u64_le();

            let needed =
                COLOUR_DATA_FIXED_SIZE.saturating_add(count.saturating_mul(COLOUR_DATUM_SIZE));
            if payload.len() < needed {
                return Err(Error::Malformed {
                    message: msg_type,
                    needed,
                    got: payload.len(),
                });
            }

            let samples = (0..count).map(|_| get_datum(&mut buf)).collect();
            Message::ColourData(ColourFrame {
                samples,
                sample_rate,
                fft_size,
                timestamp,
            })
        }
        MessageType::DiscoveryRequest => Message::DiscoveryRequest(DiscoveryRequest {
            client_name: get_text(&mut buf, NAME_CAPACITY),
            client_version: buf.get_u32_le(),
        }),
        MessageType::DiscoveryResponse => Message::DiscoveryResponse(DiscoveryResponse {
            server_name: get_text(&mut buf, NAME_CAPACITY),
            server_version: buf.get_u32_le(),
            ipc_port: buf.get_u16_le(),
            ipc_path: get_text(&mut buf, PATH_CAPACITY),
            capabilities: Capabilities::from_bits(buf.get_u32_le()),
        }),
        MessageType::ConfigUpdate => Message::ConfigUpdate(ConfigUpdate {
            smoothing_enabled: buf.get_u32_le() != 0,
            smoothing_factor: buf.get_f32_le(),
            colour_space: buf.get_u32_le(),
            frequency_min: buf.get_u32_le(),
            frequency_max: buf.get_u32_le(),
        }),
        MessageType::Ping => Message::Ping,
        MessageType::Pong => Message::Pong,
        MessageType::Error => Message::Error(ErrorResponse {
            code: buf.get_u32_le(),
            message: get_text(&mut buf, ERROR_MESSAGE_CAPACITY),
        }),
    };

    Ok(message)
}

/// Decode a complete message: header, then the body it declares
///
/// Bytes past the declared length are ignored.
///
/// # Errors
///
/// Any error from [`decode_header`] or [`decode_body`], plus
/// [`Error::UnknownMessageType`] for an unrecognised type byte.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let header = decode_header(bytes)?;
    let msg_type = header
        .message_type()
        .ok_or(Error::UnknownMessageType {
            type_byte: header.msg_type_byte(),
        })?;
    let message = decode_body(msg_type, &bytes[HEADER_SIZE..header.total_len()])?;
    Ok(Envelope { header, message })
}

/// Length of the first complete message in a stream buffer
///
/// Returns `Ok(None)` while more bytes are needed. Only the magic number and
/// the length field are inspected; version and body are checked on decode.
///
/// # Errors
///
/// [`Error::BadMagic`] when the buffer is out of sync, and
/// [`Error::MessageTooLarge`] when the declared size exceeds [`MAX_MESSAGE_SIZE`].
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>> {
    let Some(raw) = buf.first_chunk::<HEADER_SIZE>() else {
        return Ok(None);
    };

    let magic = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    if magic != MAGIC_NUMBER {
        return Err(Error::BadMagic { found: magic });
    }

    let total = HEADER_SIZE + usize::from(u16::from_le_bytes([raw[6], raw[7]]));
    if total > MAX_MESSAGE_SIZE {
        return Err(Error::MessageTooLarge {
            size: total,
            max: MAX_MESSAGE_SIZE,
        });
    }

    Ok((buf.len() >= total).then_some(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ColourSpace;

    fn sample(i: usize) -> ColourDatum {
        let f = i as f32;
        ColourDatum {
            frequency: 20.0 + f,
            wavelength: 380.0 + f / 10.0,
            r: 0.1,
            g: 0.2,
            b: 0.3,
            magnitude: f / 100.0,
            phase: -f,
        }
    }

    fn frame(count: usize) -> ColourFrame {
        ColourFrame {
            samples: (0..count).map(sample).collect(),
            sample_rate: 48_000,
            fft_size: 2048,
            timestamp: 123_456_789,
        }
    }

    fn all_kinds() -> Vec<Vec<u8>> {
        vec![
            encode_colour_data(&frame(3), 1),
            encode_discovery_request(
                &DiscoveryRequest {
                    client_name: "visualiser".into(),
                    client_version: 3,
                },
                2,
            ),
            encode_discovery_response(
                &DiscoveryResponse {
                    server_name: "Synesthesia".into(),
                    server_version: 1,
                    ipc_port: 0,
                    ipc_path: "/tmp/synesthesia_api".into(),
                    capabilities: Capabilities::from_bits(0x0F),
                },
                3,
            ),
            encode_config_update(&ConfigUpdate::default(), 4),
            encode_error(ErrorCode::InvalidMessage, "bad", 5),
            encode_ping(6),
            encode_pong(7),
        ]
    }

    #[test]
    fn test_max_colours_constant() {
        assert_eq!(MAX_COLOURS_PER_MESSAGE, 2339);
    }

    #[test]
    fn test_encoded_sizes() {
        let sizes: Vec<usize> = all_kinds().iter().map(Vec::len).collect();
        assert_eq!(
            sizes,
            vec![
                HEADER_SIZE + 20 + 3 * 28,
                HEADER_SIZE + 68,
                HEADER_SIZE + 330,
                HEADER_SIZE + 20,
                HEADER_SIZE + 260,
                HEADER_SIZE,
                HEADER_SIZE,
            ]
        );
    }

    #[test]
    fn test_colour_data_roundtrip() {
        let original = frame(4);
        let encoded = encode_colour_data(&original, 42);
        let decoded = decode(&encoded).unwrap();

        assert_eq!(decoded.header.sequence(), 42);
        assert_eq!(decoded.header.message_type(), Some(MessageType::ColourData));
        assert_eq!(decoded.message, Message::ColourData(original));
    }

    #[test]
    fn test_empty_colour_frame_roundtrip() {
        let original = frame(0);
        let decoded = decode(&encode_colour_data(&original, 0)).unwrap();
        assert_eq!(decoded.message, Message::ColourData(original));
    }

    #[test]
    fn test_max_colour_frame_roundtrip() {
        let original = frame(MAX_COLOURS_PER_MESSAGE);
        let encoded = encode_colour_data(&original, 0);
        assert!(encoded.len() <= MAX_MESSAGE_SIZE);

        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.message, Message::ColourData(original));
    }

    #[test]
    fn test_oversized_frame_is_clamped() {
        let encoded = encode_colour_data(&frame(MAX_COLOURS_PER_MESSAGE + 10), 0);
        let Message::ColourData(decoded) = decode(&encoded).unwrap().message else {
            panic!("wrong variant");
        };
        assert_eq!(decoded.samples.len(), MAX_COLOURS_PER_MESSAGE);
    }

    #[test]
    fn test_encode_into_reuses_buffer() {
        let mut buf = Vec::with_capacity(4096);
        encode_colour_data_into(&mut buf, &frame(8), 1);
        let first_len = buf.len();
        encode_colour_data_into(&mut buf, &frame(2), 2);

        assert!(buf.len() < first_len);
        assert_eq!(buf.capacity(), 4096);
        assert_eq!(decode(&buf).unwrap().header.sequence(), 2);
    }

    #[test]
    fn test_config_update_roundtrip() {
        let original = ConfigUpdate {
            smoothing_enabled: false,
            smoothing_factor: 0.35,
            colour_space: ColourSpace::Xyz.as_u32(),
            frequency_min: 50,
            frequency_max: 15_000,
        };
        let decoded = decode(&encode_config_update(&original, 9)).unwrap();
        assert_eq!(decoded.message, Message::ConfigUpdate(original));
    }

    #[test]
    fn test_discovery_roundtrip() {
        let request = DiscoveryRequest {
            client_name: "lamp".into(),
            client_version: 7,
        };
        let decoded = decode(&encode_discovery_request(&request, 1)).unwrap();
        assert_eq!(decoded.message, Message::DiscoveryRequest(request));

        let response = DiscoveryResponse {
            server_name: "Synesthesia".into(),
            server_version: 2,
            ipc_port: 8080,
            ipc_path: "/run/user/1000/synesthesia".into(),
            capabilities: Capabilities::new().with(Capabilities::XYZ_COLOUR_SPACE),
        };
        let decoded = decode(&encode_discovery_response(&response, 2)).unwrap();
        assert_eq!(decoded.message, Message::DiscoveryResponse(response));
    }

    #[test]
    fn test_error_roundtrip() {
        let decoded = decode(&encode_error(ErrorCode::Success, "pong", 77)).unwrap();
        assert_eq!(decoded.header.sequence(), 77);
        assert_eq!(
            decoded.message,
            Message::Error(ErrorResponse {
                code: 0,
                message: "pong".into()
            })
        );
    }

    #[test]
    fn test_names_truncated_at_capacity() {
        let long_name = "x".repeat(200);
        let request = DiscoveryRequest {
            client_name: long_name.clone(),
            client_version: 1,
        };
        let Message::DiscoveryRequest(decoded) =
            decode(&encode_discovery_request(&request, 0)).unwrap().message
        else {
            panic!("wrong variant");
        };
        assert_eq!(decoded.client_name, long_name[..NAME_CAPACITY - 1]);

        let exact = "y".repeat(NAME_CAPACITY - 1);
        let request = DiscoveryRequest {
            client_name: exact.clone(),
            client_version: 1,
        };
        let Message::DiscoveryRequest(decoded) =
            decode(&encode_discovery_request(&request, 0)).unwrap().message
        else {
            panic!("wrong variant");
        };
        assert_eq!(decoded.client_name, exact);
    }

    #[test]
    fn test_truncation_never_splits_a_char() {
        // 62 ASCII bytes then a 2-byte char straddling the 63-byte limit
        let name = format!("{}é", "a".repeat(62));
        let request = DiscoveryRequest {
            client_name: name,
            client_version: 1,
        };
        let Message::DiscoveryRequest(decoded) =
            decode(&encode_discovery_request(&request, 0)).unwrap().message
        else {
            panic!("wrong variant");
        };
        assert_eq!(decoded.client_name, "a".repeat(62));
    }

    #[test]
    fn test_unterminated_text_is_forced_terminated() {
        let mut encoded = encode_error(ErrorCode::InvalidMessage, "", 0);
        // Fill the whole text field, terminator slot included
        for byte in &mut encoded[HEADER_SIZE + 4..] {
            *byte = b'z';
        }
        let Message::Error(decoded) = decode(&encoded).unwrap().message else {
            panic!("wrong variant");
        };
        assert_eq!(decoded.message.len(), ERROR_MESSAGE_CAPACITY - 1);
    }

    #[test]
    fn test_every_prefix_is_truncated() {
        for encoded in all_kinds() {
            for n in 0..encoded.len() {
                let result = decode(&encoded[..n]);
                assert!(
                    matches!(result, Err(Error::Truncated { .. })),
                    "prefix {n} of {} decoded as {result:?}",
                    encoded.len()
                );
            }
        }
    }

    #[test]
    fn test_colour_count_overrun_rejected() {
        let mut encoded = encode_colour_data(&frame(2), 0);
        // Claim 3 samples while only 2 are present
        encoded[HEADER_SIZE + 8..HEADER_SIZE + 12].copy_from_slice(&3u32.to_le_bytes());

        let result = decode(&encoded);
        assert_eq!(
            result,
            Err(Error::Malformed {
                message: MessageType::ColourData,
                needed: 20 + 3 * 28,
                got: 20 + 2 * 28,
            })
        );
    }

    #[test]
    fn test_huge_colour_count_rejected() {
        let mut encoded = encode_colour_data(&frame(1), 0);
        encoded[HEADER_SIZE + 8..HEADER_SIZE + 12].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(decode(&encoded), Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_decode_body_short_payload() {
        let result = decode_body(MessageType::ConfigUpdate, &[0u8; 19]);
        assert!(matches!(result, Err(Error::Malformed { needed: 20, .. })));
    }

    #[test]
    fn test_header_rejects_wrong_magic() {
        let mut encoded = encode_ping(0);
        encoded[0] ^= 0xFF;
        assert!(matches!(decode_header(&encoded), Err(Error::BadMagic { .. })));
    }

    #[test]
    fn test_header_rejects_wrong_version() {
        let mut encoded = encode_ping(0);
        encoded[4] = 9;
        assert_eq!(
            decode_header(&encoded),
            Err(Error::UnsupportedVersion { found: 9 })
        );
    }

    #[test]
    fn test_header_rejects_length_beyond_buffer() {
        let mut encoded = encode_config_update(&ConfigUpdate::default(), 0);
        encoded[6..8].copy_from_slice(&21u16.to_le_bytes());
        assert_eq!(
            decode_header(&encoded),
            Err(Error::Truncated {
                needed: HEADER_SIZE + 21,
                got: HEADER_SIZE + 20,
            })
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut encoded = encode_ping(0);
        encoded[5] = 0x42;
        assert!(decode_header(&encoded).is_ok());
        assert_eq!(
            decode(&encoded),
            Err(Error::UnknownMessageType { type_byte: 0x42 })
        );
    }

    #[test]
    fn test_sequence_monotonic() {
        let counter = SequenceCounter::new();
        let sequences: Vec<u32> = (0..100)
            .map(|i| {
                let encoded = if i % 2 == 0 {
                    encode_ping(counter.next())
                } else {
                    encode_colour_data(&frame(1), counter.next())
                };
                decode(&encoded).unwrap().header.sequence()
            })
            .collect();

        for pair in sequences.windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }
    }

    #[test]
    fn test_timestamps_are_monotonic() {
        let first = decode(&encode_ping(0)).unwrap().header.timestamp();
        let second = decode(&encode_ping(1)).unwrap().header.timestamp();
        assert!(second >= first);
    }

    #[test]
    fn test_frame_len() {
        let mut stream = encode_ping(0);
        stream.extend_from_slice(&encode_config_update(&ConfigUpdate::default(), 1));

        assert_eq!(frame_len(&stream[..5]), Ok(None));
        assert_eq!(frame_len(&stream), Ok(Some(HEADER_SIZE)));
        assert_eq!(frame_len(&stream[HEADER_SIZE..]), Ok(Some(HEADER_SIZE + 20)));
        assert_eq!(frame_len(&stream[HEADER_SIZE..HEADER_SIZE + 30]), Ok(None));

        let mut garbage = stream.clone();
        garbage[0] = 0;
        assert!(matches!(frame_len(&garbage), Err(Error::BadMagic { .. })));

        let mut oversized = encode_ping(0);
        oversized[6..8].copy_from_slice(&u16::MAX.to_le_bytes());
        assert!(matches!(
            frame_len(&oversized),
            Err(Error::MessageTooLarge { .. })
        ));
    }

    // Property-based tests
    #[cfg(test)]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn datum_strategy() -> impl Strategy<Value = ColourDatum> {
            (
                0.0f32..24_000.0,
                380.0f32..750.0,
                0.0f32..1.0,
                0.0f32..1.0,
                0.0f32..1.0,
                0.0f32..10.0,
                -3.2f32..3.2,
            )
                .prop_map(|(frequency, wavelength, r, g, b, magnitude, phase)| ColourDatum {
                    frequency,
                    wavelength,
                    r,
                    g,
                    b,
                    magnitude,
                    phase,
                })
        }

        fn frame_strategy() -> impl Strategy<Value = ColourFrame> {
            (
                prop::collection::vec(datum_strategy(), 0..=256),
                any::<u32>(),
                any::<u32>(),
                any::<u64>(),
            )
                .prop_map(|(samples, sample_rate, fft_size, timestamp)| ColourFrame {
                    samples,
                    sample_rate,
                    fft_size,
                    timestamp,
                })
        }

        // Text without nul, which would end the field early
        fn text_strategy(max: usize) -> impl Strategy<Value = String> {
            proptest::string::string_regex(&format!("[a-zA-Z0-9 _./-]{{0,{max}}}")).unwrap()
        }

        proptest! {
            /// Property: Any colour frame should roundtrip correctly
            #[test]
            fn prop_colour_frame_roundtrip(frame in frame_strategy(), seq in any::<u32>()) {
                let decoded = decode(&encode_colour_data(&frame, seq)).unwrap();
                prop_assert_eq!(decoded.header.sequence(), seq);
                prop_assert_eq!(decoded.message, Message::ColourData(frame));
            }

            /// Property: Config updates roundtrip for every field value
            #[test]
            fn prop_config_roundtrip(
                smoothing_enabled in any::<bool>(),
                smoothing_factor in -10.0f32..10.0,
                colour_space in any::<u32>(),
                frequency_min in any::<u32>(),
                frequency_max in any::<u32>(),
            ) {
                let config = ConfigUpdate {
                    smoothing_enabled,
                    smoothing_factor,
                    colour_space,
                    frequency_min,
                    frequency_max,
                };
                let decoded = decode(&encode_config_update(&config, 0)).unwrap();
                prop_assert_eq!(decoded.message, Message::ConfigUpdate(config));
            }

            /// Property: Discovery responses roundtrip, names clipped at capacity - 1
            #[test]
            fn prop_discovery_response_roundtrip(
                server_name in text_strategy(100),
                ipc_path in text_strategy(300),
                server_version in any::<u32>(),
                ipc_port in any::<u16>(),
                bits in any::<u32>(),
            ) {
                let response = DiscoveryResponse {
                    server_name: server_name.clone(),
                    server_version,
                    ipc_port,
                    ipc_path: ipc_path.clone(),
                    capabilities: Capabilities::from_bits(bits),
                };
                let Message::DiscoveryResponse(decoded) =
                    decode(&encode_discovery_response(&response, 0)).unwrap().message
                else {
                    return Err(TestCaseError::fail("wrong variant"));
                };

                let name_len = server_name.len().min(NAME_CAPACITY - 1);
                let path_len = ipc_path.len().min(PATH_CAPACITY - 1);
                prop_assert_eq!(&decoded.server_name, &server_name[..name_len]);
                prop_assert_eq!(&decoded.ipc_path, &ipc_path[..path_len]);
                prop_assert_eq!(decoded.server_version, server_version);
                prop_assert_eq!(decoded.ipc_port, ipc_port);
                prop_assert_eq!(decoded.capabilities.bits(), bits);
            }

            /// Property: No prefix of a valid message ever decodes
            #[test]
            fn prop_prefix_is_truncated(frame in frame_strategy(), cut in 0.0f64..1.0) {
                let encoded = encode_colour_data(&frame, 0);
                let n = (encoded.len() as f64 * cut) as usize;
                prop_assert!(
                    matches!(decode(&encoded[..n]), Err(Error::Truncated { .. })),
                    "prefix should be truncated"
                );
            }

            /// Property: Random bytes never panic the decoder
            #[test]
            fn prop_garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
                let _ = decode(&bytes);
                let _ = frame_len(&bytes);
            }

            /// Property: Any declared count beyond the payload is rejected
            #[test]
            fn prop_count_overrun_rejected(
                frame in frame_strategy(),
                extra in 1u32..10_000,
            ) {
                let mut encoded = encode_colour_data(&frame, 0);
                let declared = u32::try_from(frame.samples.len()).unwrap() + extra;
                encoded[HEADER_SIZE + 8..HEADER_SIZE + 12].copy_from_slice(&declared.to_le_bytes());
                let is_malformed = matches!(decode(&encoded), Err(Error::Malformed { .. }));
                prop_assert!(is_malformed);
            }

            /// Property: Invalid magic numbers should always be rejected
            #[test]
            fn prop_invalid_magic_rejected(
                invalid_magic in any::<u32>().prop_filter("not valid magic", |m| *m != MAGIC_NUMBER),
            ) {
                let mut encoded = encode_config_update(&ConfigUpdate::default(), 0);
                encoded[0..4].copy_from_slice(&invalid_magic.to_le_bytes());
                let is_bad_magic = matches!(decode(&encoded), Err(Error::BadMagic { .. }));
                prop_assert!(is_bad_magic);
            }
        }
    }
}
