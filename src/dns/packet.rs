use crate::dns::types::{DnsClass, RecordType, ResponseCode};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Raw DNS message codec - binary level per RFC 1035.
/// Parsing supports label compression; encoding always writes
/// uncompressed names.

#[derive(Debug, Clone)]
pub struct DnsHeader {
    pub id: u16,
    pub qr: bool,   // Query/Response flag
    pub opcode: u8, // 4 bits
    pub aa: bool,   // Authoritative Answer
    pub tc: bool,   // Truncated
    pub rd: bool,   // Recursion Desired
    pub ra: bool,   // Recursion Available
    pub z: u8,      // Reserved (3 bits)
    pub rcode: ResponseCode,
}

#[derive(Debug, Clone)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: RecordType,
    pub qclass: DnsClass,
}

#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: RecordType,
    pub rclass: DnsClass,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
    pub additionals: Vec<DnsRecord>,
}

impl fmt::Display for DnsPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(q) = self.questions.first() {
            write!(f, "{} {} (answers: {})", q.name, q.qtype.name(), self.answers.len())
        } else {
            write!(f, "(empty query)")
        }
    }
}

/// Parse a DNS name from raw bytes with label compression support (RFC 1035 §4.1.4)
pub fn parse_name(data: &[u8], offset: &mut usize) -> anyhow::Result<String> {
    let mut labels = Vec::new();
    let mut jumped = false;
    let mut pos = *offset;
    let mut jumps_performed = 0;
    const MAX_JUMPS: usize = 10; // Prevent infinite loops

    loop {
        if pos >= data.len() {
            return Err(anyhow::anyhow!("DNS name parse: unexpected end of data at offset {}", pos));
        }

        let len_byte = data[pos];

        // Check for pointer (compression) - top 2 bits are 11
        if (len_byte & 0xC0) == 0xC0 {
            if pos + 1 >= data.len() {
                return Err(anyhow::anyhow!("DNS name parse: truncated pointer at offset {}", pos));
            }
            if !jumped {
                // Save where we need to continue reading after this name
                *offset = pos + 2;
                jumped = true;
            }
            let pointer = ((len_byte as u16 & 0x3F) << 8) | data[pos + 1] as u16;
            pos = pointer as usize;
            jumps_performed += 1;
            if jumps_performed > MAX_JUMPS {
                return Err(anyhow::anyhow!("DNS name parse: too many jumps (possible loop)"));
            }
            continue;
        }

        // Normal label
        if len_byte == 0 {
            // End of name
            if !jumped {
                *offset = pos + 1;
            }
            break;
        }

        let label_len = len_byte as usize;
        pos += 1;

        if pos + label_len > data.len() {
            return Err(anyhow::anyhow!("DNS name parse: label extends beyond packet"));
        }

        let label = String::from_utf8_lossy(&data[pos..pos + label_len]).to_string();
        labels.push(label);
        pos += label_len;
    }

    Ok(labels.join("."))
}

/// Parse a complete DNS message from raw bytes
pub fn parse_packet(data: &[u8]) -> anyhow::Result<DnsPacket> {
    if data.len() < 12 {
        return Err(anyhow::anyhow!("DNS packet too short: {} bytes (minimum 12)", data.len()));
    }

    // Parse header (12 bytes)
    let id = u16::from_be_bytes([data[0], data[1]]);
    let flags = u16::from_be_bytes([data[2], data[3]]);
    let qdcount = u16::from_be_bytes([data[4], data[5]]);
    let ancount = u16::from_be_bytes([data[6], data[7]]);
    let nscount = u16::from_be_bytes([data[8], data[9]]);
    let arcount = u16::from_be_bytes([data[10], data[11]]);

    let header = DnsHeader {
        id,
        qr: (flags >> 15) & 1 == 1,
        opcode: ((flags >> 11) & 0xF) as u8,
        aa: (flags >> 10) & 1 == 1,
        tc: (flags >> 9) & 1 == 1,
        rd: (flags >> 8) & 1 == 1,
        ra: (flags >> 7) & 1 == 1,
        z: ((flags >> 4) & 0x7) as u8,
        rcode: ResponseCode::from((flags & 0xF) as u8),
    };

    let mut offset = 12;

    // Parse questions
    let mut questions = Vec::new();
    for _ in 0..qdcount {
        let name = parse_name(data, &mut offset)?;
        if offset + 4 > data.len() {
            return Err(anyhow::anyhow!("DNS question section truncated"));
        }
        let qtype = RecordType::from(u16::from_be_bytes([data[offset], data[offset + 1]]));
        let qclass = DnsClass::from(u16::from_be_bytes([data[offset + 2], data[offset + 3]]));
        offset += 4;
        questions.push(DnsQuestion { name, qtype, qclass });
    }

    // Parse resource records (answers, authorities, additionals)
    let answers = parse_records(data, &mut offset, ancount)?;
    let authorities = parse_records(data, &mut offset, nscount)?;
    let additionals = parse_records(data, &mut offset, arcount)?;

    Ok(DnsPacket {
        header,
        questions,
        answers,
        authorities,
        additionals,
    })
}

fn parse_records(data: &[u8], offset: &mut usize, count: u16) -> anyhow::Result<Vec<DnsRecord>> {
    let mut records = Vec::new();
    for _ in 0..count {
        let name = parse_name(data, offset)?;
        if *offset + 10 > data.len() {
            return Err(anyhow::anyhow!("DNS record truncated at offset {}", offset));
        }
        let rtype = RecordType::from(u16::from_be_bytes([data[*offset], data[*offset + 1]]));
        let rclass = DnsClass::from(u16::from_be_bytes([data[*offset + 2], data[*offset + 3]]));
        let ttl = u32::from_be_bytes([data[*offset + 4], data[*offset + 5], data[*offset + 6], data[*offset + 7]]);
        let rdlength = u16::from_be_bytes([data[*offset + 8], data[*offset + 9]]);
        *offset += 10;

        if *offset + rdlength as usize > data.len() {
            return Err(anyhow::anyhow!("DNS rdata extends beyond packet"));
        }
        let rdata = data[*offset..*offset + rdlength as usize].to_vec();
        *offset += rdlength as usize;

        records.push(DnsRecord { name, rtype, rclass, ttl, rdata });
    }
    Ok(records)
}

/// Encode a DNS name into wire format
pub fn encode_name(name: &str) -> Vec<u8> {
    let mut result = Vec::new();
    if name.is_empty() {
        result.push(0);
        return result;
    }
    for label in name.split('.') {
        result.push(label.len() as u8);
        result.extend_from_slice(label.as_bytes());
    }
    result.push(0);
    result
}

fn encode_record(record: &DnsRecord, out: &mut Vec<u8>) {
    out.extend_from_slice(&encode_name(&record.name));
    out.extend_from_slice(&record.rtype.to_u16().to_be_bytes());
    out.extend_from_slice(&record.rclass.to_u16().to_be_bytes());
    out.extend_from_slice(&record.ttl.to_be_bytes());
    out.extend_from_slice(&(record.rdata.len() as u16).to_be_bytes());
    out.extend_from_slice(&record.rdata);
}

/// Serialize a DNS message to wire format. Section counts come from the
/// actual section lengths, not the parsed header.
pub fn encode_packet(packet: &DnsPacket) -> Vec<u8> {
    let h = &packet.header;
    let mut out = Vec::with_capacity(512);

    out.extend_from_slice(&h.id.to_be_bytes());
    let flags: u16 = ((h.qr as u16) << 15)
        | ((h.opcode as u16 & 0xF) << 11)
        | ((h.aa as u16) << 10)
        | ((h.tc as u16) << 9)
        | ((h.rd as u16) << 8)
        | ((h.ra as u16) << 7)
        | ((h.z as u16 & 0x7) << 4)
        | (h.rcode.to_u8() as u16 & 0xF);
    out.extend_from_slice(&flags.to_be_bytes());
    out.extend_from_slice(&(packet.questions.len() as u16).to_be_bytes());
    out.extend_from_slice(&(packet.answers.len() as u16).to_be_bytes());
    out.extend_from_slice(&(packet.authorities.len() as u16).to_be_bytes());
    out.extend_from_slice(&(packet.additionals.len() as u16).to_be_bytes());

    for q in &packet.questions {
        out.extend_from_slice(&encode_name(&q.name));
        out.extend_from_slice(&q.qtype.to_u16().to_be_bytes());
        out.extend_from_slice(&q.qclass.to_u16().to_be_bytes());
    }
    for r in &packet.answers {
        encode_record(r, &mut out);
    }
    for r in &packet.authorities {
        encode_record(r, &mut out);
    }
    for r in &packet.additionals {
        encode_record(r, &mut out);
    }

    out
}

/// Build a single-question query message
pub fn build_query(id: u16, name: &str, qtype: RecordType, rd: bool) -> DnsPacket {
    DnsPacket {
        header: DnsHeader {
            id,
            qr: false,
            opcode: 0,
            aa: false,
            tc: false,
            rd,
            ra: false,
            z: 0,
            rcode: ResponseCode::NoError,
        },
        questions: vec![DnsQuestion {
            name: name.to_string(),
            qtype,
            qclass: DnsClass::IN,
        }],
        answers: Vec::new(),
        authorities: Vec::new(),
        additionals: Vec::new(),
    }
}

/// Read one length-framed DNS message from a TCP stream.
/// Returns `Ok(None)` on clean EOF at the length prefix.
pub async fn read_framed<R: AsyncRead + Unpin>(stream: &mut R) -> anyhow::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 2];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let msg_len = u16::from_be_bytes(len_buf) as usize;
    if msg_len == 0 {
        return Ok(None);
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// Write one length-framed DNS message to a TCP stream
pub async fn write_framed<W: AsyncWrite + Unpin>(stream: &mut W, msg: &[u8]) -> anyhow::Result<()> {
    let len = (msg.len() as u16).to_be_bytes();
    stream.write_all(&len).await?;
    stream.write_all(msg).await?;
    Ok(())
}
