//! Human-readable rendering of agent replies and pushed records.

use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tattle_proto::{EventRecord, Member, QueryRecord, QueryRecordKind};

/// Renders the address octets of a wire member, if they form an IP address.
pub(crate) fn member_address(member: &Member) -> Option<SocketAddr> {
    let ip = if let Ok(octets) = <[u8; 4]>::try_from(member.addr.as_slice()) {
        IpAddr::V4(Ipv4Addr::from(octets))
    } else if let Ok(octets) = <[u8; 16]>::try_from(member.addr.as_slice()) {
        IpAddr::V6(Ipv6Addr::from(octets))
    } else {
        return None;
    };
    Some(SocketAddr::new(ip, member.port))
}

fn render_tags(member: &Member) -> String {
    member
        .tags
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// One line per member: name, address, status, tags.
pub(crate) fn write_members<W: Write>(out: &mut W, members: &[Member]) -> io::Result<()> {
    let width = members
        .iter()
        .map(|member| member.name.len())
        .max()
        .unwrap_or(0);
    for member in members {
        let address = member_address(member)
            .map_or_else(|| String::from("-"), |address| address.to_string());
        let line = format!(
            "{:<width$}  {:<21}  {:<7}  {}",
            member.name,
            address,
            member.status,
            render_tags(member)
        );
        writeln!(out, "{}", line.trim_end())?;
    }
    out.flush()
}

fn member_names(members: &[Member]) -> String {
    members
        .iter()
        .map(|member| member.name.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Writes one event record and flushes so long-running streams show up live.
pub(crate) fn write_event<W: Write>(out: &mut W, record: &EventRecord) -> io::Result<()> {
    match record {
        EventRecord::MemberJoin { members }
        | EventRecord::MemberLeave { members }
        | EventRecord::MemberFailed { members }
        | EventRecord::MemberUpdate { members }
        | EventRecord::MemberReap { members } => {
            writeln!(out, "{}: {}", record.event_type(), member_names(members))?;
        }
        EventRecord::User {
            ltime,
            name,
            payload,
            coalesce,
        } => {
            let coalesce = if *coalesce { " coalesce" } else { "" };
            writeln!(
                out,
                "user: {name} ltime={ltime}{coalesce} payload={}",
                String::from_utf8_lossy(payload)
            )?;
        }
        EventRecord::Query {
            id,
            ltime,
            name,
            payload,
        } => {
            writeln!(
                out,
                "query: {name} id={id} ltime={ltime} payload={}",
                String::from_utf8_lossy(payload)
            )?;
        }
    }
    out.flush()
}

/// Writes one query progress record.
pub(crate) fn write_query_record<W: Write>(out: &mut W, record: &QueryRecord) -> io::Result<()> {
    match record.kind {
        QueryRecordKind::Ack => writeln!(out, "ack from {}", record.from)?,
        QueryRecordKind::Response => writeln!(
            out,
            "response from {}: {}",
            record.from,
            String::from_utf8_lossy(&record.payload)
        )?,
        QueryRecordKind::Done => writeln!(out, "query complete")?,
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn member() -> Member {
        Member {
            name: String::from("alpha"),
            addr: vec![10, 0, 0, 7],
            port: 7946,
            tags: BTreeMap::from([(String::from("role"), String::from("web"))]),
            status: String::from("alive"),
            protocol_min: 4,
            protocol_max: 4,
            protocol_cur: 4,
            delegate_min: 5,
            delegate_max: 5,
            delegate_cur: 5,
        }
    }

    #[rstest]
    fn renders_member_rows(member: Member) {
        let mut out = Vec::new();
        write_members(&mut out, &[member]).expect("render");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("alpha  10.0.0.7:7946"), "{text}");
        assert!(text.contains("alive"), "{text}");
        assert!(text.trim_end().ends_with("role=web"), "{text}");
    }

    #[rstest]
    fn rejects_malformed_addresses(mut member: Member) {
        member.addr = vec![1, 2, 3];
        assert_eq!(member_address(&member), None);
        member.addr = vec![0; 16];
        assert_eq!(
            member_address(&member),
            Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 7946))
        );
    }

    #[rstest]
    fn renders_member_events_with_names(member: Member) {
        let mut out = Vec::new();
        write_event(
            &mut out,
            &EventRecord::MemberJoin {
                members: vec![member],
            },
        )
        .expect("render");
        assert_eq!(String::from_utf8(out).expect("utf8"), "member-join: alpha\n");
    }

    #[test]
    fn renders_query_progress() {
        let mut out = Vec::new();
        write_query_record(&mut out, &QueryRecord::response("alpha", b"pong".to_vec()))
            .expect("render");
        write_query_record(&mut out, &QueryRecord::done()).expect("render");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "response from alpha: pong\nquery complete\n"
        );
    }
}
