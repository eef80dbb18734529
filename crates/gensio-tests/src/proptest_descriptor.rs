//! Property-based tests for descriptors and byte fidelity through stacks.

use proptest::prelude::*;

/// Keyed parameters for one filter stage, rendered in descriptor syntax.
#[derive(Debug, Clone)]
pub enum FilterParams {
    Mux { chunksize: u16 },
    MsgDelim { crc: bool, readbuf: u32 },
    Ssl { clientauth: bool },
}

impl FilterParams {
    pub fn render(&self) -> String {
        match self {
            FilterParams::Mux { chunksize } => format!("mux(chunksize={})", chunksize),
            FilterParams::MsgDelim { crc, readbuf } => {
                format!("msgdelim(crc={},readbuf={})", crc, readbuf)
            }
            FilterParams::Ssl { clientauth: true } => {
                "ssl(key=key.pem,cert=cert.pem,CA=CA.pem,clientauth)".to_string()
            }
            FilterParams::Ssl { clientauth: false } => "ssl(CA=CA.pem)".to_string(),
        }
    }
}

pub fn filter_strategy() -> impl Strategy<Value = FilterParams> {
    prop_oneof![
        (1u16..=u16::MAX).prop_map(|chunksize| FilterParams::Mux { chunksize }),
        (any::<bool>(), 1u32..1_000_000)
            .prop_map(|(crc, readbuf)| FilterParams::MsgDelim { crc, readbuf }),
        any::<bool>().prop_map(|clientauth| FilterParams::Ssl { clientauth }),
    ]
}

pub fn transport_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("echo".to_string()),
        (prop_oneof![Just("tcp"), Just("sctp")], 1u16..=u16::MAX)
            .prop_map(|(kind, port)| format!("{},{}", kind, port)),
        (
            prop_oneof![Just("tcp"), Just("sctp")],
            "[a-z][a-z0-9]{0,10}",
            1u16..=u16::MAX
        )
            .prop_map(|(kind, host, port)| format!("{},{},{}", kind, host, port)),
    ]
}

/// A full descriptor: up to four filters over one transport.
pub fn descriptor_strategy() -> impl Strategy<Value = String> {
    (
        prop::collection::vec(filter_strategy(), 0..4),
        transport_strategy(),
    )
        .prop_map(|(filters, transport)| {
            let mut parts: Vec<String> = filters.iter().map(FilterParams::render).collect();
            parts.push(transport);
            parts.join(",")
        })
}
