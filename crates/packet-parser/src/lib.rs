#![forbid(unsafe_code)]

/// Errors that can occur during parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Truncated(&'static str),
    Invalid(&'static str),
    Unsupported(&'static str),
}

/// Known EtherType values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherType {
    Ipv4,
    Ipv6,
    Arp,
    Other(u16),
}

impl EtherType {
    pub fn from_raw(value: u16) -> Self {
        match value {
            0x0800 => EtherType::Ipv4,
            0x86DD => EtherType::Ipv6,
            0x0806 => EtherType::Arp,
            other => EtherType::Other(other),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match *self {
            EtherType::Ipv4 => 0x0800,
            EtherType::Ipv6 => 0x86DD,
            EtherType::Arp => 0x0806,
            EtherType::Other(v) => v,
        }
    }
}

/// Identifies the payload protocol for IPv4 packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpProtocol {
    Tcp,
    Udp,
    Other(u8),
}

impl IpProtocol {
    pub fn from_raw(value: u8) -> Self {
        match value {
            6 => IpProtocol::Tcp,
            17 => IpProtocol::Udp,
            other => IpProtocol::Other(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match *self {
            IpProtocol::Tcp => 6,
            IpProtocol::Udp => 17,
            IpProtocol::Other(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame<'a> {
    pub destination: [u8; 6],
    pub source: [u8; 6],
    pub ethertype: EtherType,
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header<'a> {
    pub version: u8,
    pub header_length: usize,
    pub total_length: u16,
    pub ttl: u8,
    pub protocol: IpProtocol,
    pub source: [u8; 4],
    pub destination: [u8; 4],
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader<'a> {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence_number: u32,
    pub acknowledgement_number: u32,
    pub header_length: usize,
    pub flags: u8,
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpDatagram<'a> {
    pub source_port: u16,
    pub destination_port: u16,
    pub length: u16,
    pub checksum: u16,
    pub payload: &'a [u8],
}

/// Transport-layer fields of a fully parsed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp {
        src_port: u16,
        dst_port: u16,
        seq: u32,
        ack: u32,
        flags: u8,
    },
    Udp {
        src_port: u16,
        dst_port: u16,
    },
    None,
}

/// One packet decoded through all layers this pipeline understands.
///
/// `payload_offset`/`payload_length` index into the original raw buffer, so
/// the payload location survives once the owned bytes move between stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket {
    pub src_mac: String,
    pub dst_mac: String,
    pub ethertype: EtherType,
    pub has_ip: bool,
    pub ip_version: u8,
    pub ttl: u8,
    pub protocol: u8,
    pub src_ip: [u8; 4],
    pub dst_ip: [u8; 4],
    pub transport: Transport,
    pub payload_offset: usize,
    pub payload_length: usize,
}

impl ParsedPacket {
    pub fn has_transport(&self) -> bool {
        !matches!(self.transport, Transport::None)
    }
}

/// Parse an Ethernet frame. Returns the remaining payload.
pub fn parse_ethernet_frame(data: &[u8]) -> Result<EthernetFrame<'_>, ParseError> {
    if data.len() < 14 {
        return Err(ParseError::Truncated("ethernet header"));
    }

    let destination = copy_array(&data[0..6]);
    let source = copy_array(&data[6..12]);
    let ethertype = EtherType::from_raw(read_u16(&data[12..14]));

    Ok(EthernetFrame {
        destination,
        source,
        ethertype,
        payload: &data[14..],
    })
}

/// Parse an IPv4 packet, extracting header fields and payload slice.
///
/// The payload is everything after the header; trailing link-layer padding
/// is not trimmed, matching what the capture records actually carry.
pub fn parse_ipv4_packet(data: &[u8]) -> Result<Ipv4Header<'_>, ParseError> {
    if data.len() < 20 {
        return Err(ParseError::Truncated("ipv4 base header"));
    }
    let version = data[0] >> 4;
    if version != 4 {
        return Err(ParseError::Invalid("ipv4 version"));
    }
    let ihl = data[0] & 0x0F;
    let header_length = (ihl as usize) * 4;
    if header_length < 20 {
        return Err(ParseError::Invalid("ipv4 ihl too small"));
    }
    if data.len() < header_length {
        return Err(ParseError::Truncated("ipv4 header with options"));
    }

    Ok(Ipv4Header {
        version,
        header_length,
        total_length: read_u16(&data[2..4]),
        ttl: data[8],
        protocol: IpProtocol::from_raw(data[9]),
        source: copy_array(&data[12..16]),
        destination: copy_array(&data[16..20]),
        payload: &data[header_length..],
    })
}

/// Parse a TCP segment.
pub fn parse_tcp_segment(data: &[u8]) -> Result<TcpHeader<'_>, ParseError> {
    if data.len() < 20 {
        return Err(ParseError::Truncated("tcp base header"));
    }
    let data_offset = data[12] >> 4;
    let header_length = (data_offset as usize) * 4;
    if header_length < 20 {
        return Err(ParseError::Invalid("tcp data offset too small"));
    }
    if data.len() < header_length {
        return Err(ParseError::Truncated("tcp header with options"));
    }

    Ok(TcpHeader {
        source_port: read_u16(&data[0..2]),
        destination_port: read_u16(&data[2..4]),
        sequence_number: read_u32(&data[4..8]),
        acknowledgement_number: read_u32(&data[8..12]),
        header_length,
        flags: data[13],
        payload: &data[header_length..],
    })
}

/// Parse a UDP datagram. The 8-byte header is fixed; the payload is the
/// rest of the buffer regardless of the embedded length field.
pub fn parse_udp_datagram(data: &[u8]) -> Result<UdpDatagram<'_>, ParseError> {
    if data.len() < 8 {
        return Err(ParseError::Truncated("udp header"));
    }
    Ok(UdpDatagram {
        source_port: read_u16(&data[0..2]),
        destination_port: read_u16(&data[2..4]),
        length: read_u16(&data[4..6]),
        checksum: read_u16(&data[6..8]),
        payload: &data[8..],
    })
}

/// Decode a raw link-layer buffer through Ethernet, IPv4 and TCP/UDP.
///
/// Non-IPv4 frames and non-TCP/UDP protocols still parse successfully; the
/// deeper layers are simply absent from the result. Only genuinely
/// malformed headers produce an error.
pub fn parse_packet(data: &[u8]) -> Result<ParsedPacket, ParseError> {
    let eth = parse_ethernet_frame(data)?;

    let mut parsed = ParsedPacket {
        src_mac: format_mac(&eth.source),
        dst_mac: format_mac(&eth.destination),
        ethertype: eth.ethertype,
        has_ip: false,
        ip_version: 0,
        ttl: 0,
        protocol: 0,
        src_ip: [0; 4],
        dst_ip: [0; 4],
        transport: Transport::None,
        payload_offset: 14,
        payload_length: data.len().saturating_sub(14),
    };

    if eth.ethertype != EtherType::Ipv4 {
        return Ok(parsed);
    }

    let ip = parse_ipv4_packet(eth.payload)?;
    parsed.has_ip = true;
    parsed.ip_version = ip.version;
    parsed.ttl = ip.ttl;
    parsed.protocol = ip.protocol.as_u8();
    parsed.src_ip = ip.source;
    parsed.dst_ip = ip.destination;
    parsed.payload_offset = 14 + ip.header_length;
    parsed.payload_length = ip.payload.len();

    match ip.protocol {
        IpProtocol::Tcp => {
            let tcp = parse_tcp_segment(ip.payload)?;
            parsed.transport = Transport::Tcp {
                src_port: tcp.source_port,
                dst_port: tcp.destination_port,
                seq: tcp.sequence_number,
                ack: tcp.acknowledgement_number,
                flags: tcp.flags,
            };
            parsed.payload_offset += tcp.header_length;
            parsed.payload_length = tcp.payload.len();
        }
        IpProtocol::Udp => {
            let udp = parse_udp_datagram(ip.payload)?;
            parsed.transport = Transport::Udp {
                src_port: udp.source_port,
                dst_port: udp.destination_port,
            };
            parsed.payload_offset += 8;
            parsed.payload_length = udp.payload.len();
        }
        IpProtocol::Other(_) => {}
    }

    Ok(parsed)
}

pub fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

pub fn read_u16(bytes: &[u8]) -> u16 {
    let mut array = [0u8; 2];
    array.copy_from_slice(&bytes[..2]);
    u16::from_be_bytes(array)
}

pub fn read_u24(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32
}

pub fn read_u32(bytes: &[u8]) -> u32 {
    let mut array = [0u8; 4];
    array.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(array)
}

fn copy_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_ipv4_tcp_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]); // dst
        frame.extend_from_slice(&[0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f]); // src
        frame.extend_from_slice(&[0x08, 0x00]); // IPv4 ethertype
        let total_len = (20 + 20 + payload.len()) as u16;
        frame.extend_from_slice(&[0x45, 0x00]);
        frame.extend_from_slice(&total_len.to_be_bytes());
        frame.extend_from_slice(&[
            0x12, 0x34, 0x40, 0x00, // identification, flags/fragment offset
            0x40, 0x06, 0x00, 0x00, // ttl, protocol TCP, checksum placeholder
            192, 168, 1, 10, // src
            192, 168, 1, 1, // dst
        ]);
        frame.extend_from_slice(&[
            0x00, 0x50, 0x01, 0xbb, // src port 80, dst port 443
            0x00, 0x00, 0x00, 0x01, // seq
            0x00, 0x00, 0x00, 0x00, // ack
            0x50, 0x02, 0x72, 0x10, // data offset 5, flags SYN, window
            0x00, 0x00, 0x00, 0x00, // checksum, urgent
        ]);
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn parse_ipv4_tcp_layers() {
        let frame = build_ipv4_tcp_frame(b"hello");
        let eth = parse_ethernet_frame(&frame).expect("parse ethernet");
        assert_eq!(eth.ethertype, EtherType::Ipv4);

        let ipv4 = parse_ipv4_packet(eth.payload).expect("parse ipv4");
        assert_eq!(ipv4.protocol, IpProtocol::Tcp);
        assert_eq!(ipv4.ttl, 0x40);
        assert_eq!(ipv4.source, [192, 168, 1, 10]);

        let tcp = parse_tcp_segment(ipv4.payload).expect("parse tcp");
        assert_eq!(tcp.source_port, 80);
        assert_eq!(tcp.destination_port, 443);
        assert_eq!(tcp.flags, 0x02);
        assert_eq!(tcp.payload, b"hello");
    }

    #[test]
    fn parsed_packet_offsets_index_the_raw_buffer() {
        let frame = build_ipv4_tcp_frame(b"payload!");
        let parsed = parse_packet(&frame).expect("parse packet");
        assert!(parsed.has_ip);
        assert_eq!(parsed.protocol, 6);
        assert_eq!(parsed.payload_offset, 14 + 20 + 20);
        assert_eq!(parsed.payload_length, 8);
        assert_eq!(
            &frame[parsed.payload_offset..parsed.payload_offset + parsed.payload_length],
            b"payload!"
        );
        assert_eq!(parsed.src_mac, "0a:0b:0c:0d:0e:0f");
        match parsed.transport {
            Transport::Tcp {
                src_port,
                dst_port,
                flags,
                ..
            } => {
                assert_eq!(src_port, 80);
                assert_eq!(dst_port, 443);
                assert_eq!(flags, 0x02);
            }
            other => panic!("expected tcp transport, got {:?}", other),
        }
    }

    #[test]
    fn non_ipv4_frames_keep_only_the_ethernet_layer() {
        let mut frame = vec![0u8; 14];
        frame[12] = 0x08;
        frame[13] = 0x06; // ARP
        frame.extend_from_slice(&[0u8; 28]);
        let parsed = parse_packet(&frame).expect("parse packet");
        assert!(!parsed.has_ip);
        assert!(!parsed.has_transport());
        assert_eq!(parsed.ethertype, EtherType::Arp);
    }

    #[test]
    fn udp_payload_is_rest_of_buffer() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0xff; 6]);
        frame.extend_from_slice(&[0x00; 6]);
        frame.extend_from_slice(&[0x08, 0x00]);
        frame.extend_from_slice(&[
            0x45, 0x00, 0x00, 0x21, 0x00, 0x00, 0x00, 0x00, 0x40, 0x11, 0x00, 0x00, 10, 0, 0, 1,
            10, 0, 0, 2,
        ]);
        frame.extend_from_slice(&[0x13, 0x88, 0x00, 0x35, 0x00, 0x0d, 0x00, 0x00]); // 5000 -> 53
        frame.extend_from_slice(b"abcde");
        let parsed = parse_packet(&frame).expect("parse packet");
        assert_eq!(parsed.protocol, 17);
        assert_eq!(parsed.payload_length, 5);
        match parsed.transport {
            Transport::Udp { src_port, dst_port } => {
                assert_eq!(src_port, 5000);
                assert_eq!(dst_port, 53);
            }
            other => panic!("expected udp transport, got {:?}", other),
        }
    }

    #[test]
    fn detects_truncated_headers() {
        assert!(matches!(
            parse_ethernet_frame(&[0u8; 10]),
            Err(ParseError::Truncated(_))
        ));
        assert!(matches!(
            parse_ipv4_packet(&[0x45u8; 10]),
            Err(ParseError::Truncated(_))
        ));
        assert!(matches!(
            parse_tcp_segment(&[0u8; 12]),
            Err(ParseError::Truncated(_))
        ));
        assert!(matches!(
            parse_udp_datagram(&[0u8; 6]),
            Err(ParseError::Truncated(_))
        ));
    }

    #[test]
    fn rejects_invalid_headers() {
        let mut ipv4 = [0u8; 20];
        ipv4[0] = 0x41; // version 4, ihl=1
        assert!(matches!(
            parse_ipv4_packet(&ipv4),
            Err(ParseError::Invalid(_))
        ));

        let mut ipv6 = [0u8; 20];
        ipv6[0] = 0x60;
        assert!(matches!(
            parse_ipv4_packet(&ipv6),
            Err(ParseError::Invalid(_))
        ));

        let mut tcp = [0u8; 20];
        tcp[12] = 0x10; // data offset 1
        assert!(matches!(
            parse_tcp_segment(&tcp),
            Err(ParseError::Invalid(_))
        ));
    }

    #[test]
    fn read_helpers_are_big_endian() {
        assert_eq!(read_u16(&[0x01, 0x02]), 0x0102);
        assert_eq!(read_u24(&[0x01, 0x02, 0x03]), 0x010203);
        assert_eq!(read_u32(&[0x01, 0x02, 0x03, 0x04]), 0x01020304);
    }
}
