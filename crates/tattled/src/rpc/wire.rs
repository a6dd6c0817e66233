//! Translation from agent types to wire records.

use std::net::IpAddr;

use tattle_proto::Member as WireMember;

use crate::agent::Member;

/// Copies a member snapshot field by field into its wire form.
pub(crate) fn member(member: &Member) -> WireMember {
    let addr = match member.addr {
        IpAddr::V4(ip) => ip.octets().to_vec(),
        IpAddr::V6(ip) => ip.octets().to_vec(),
    };
    WireMember {
        name: member.name.clone(),
        addr,
        port: member.port,
        tags: member.tags.clone(),
        status: member.status.as_str().to_owned(),
        protocol_min: member.protocol.min,
        protocol_max: member.protocol.max,
        protocol_cur: member.protocol.cur,
        delegate_min: member.delegate.min,
        delegate_max: member.delegate.max,
        delegate_cur: member.delegate.cur,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::net::Ipv6Addr;

    use super::*;
    use crate::agent::{MemberStatus, VersionRange};

    #[test]
    fn ipv6_members_keep_sixteen_octets() {
        let snapshot = Member {
            name: "beta".into(),
            addr: IpAddr::V6(Ipv6Addr::LOCALHOST),
            port: 7946,
            tags: BTreeMap::from([("dc".into(), "east".into())]),
            status: MemberStatus::Failed,
            protocol: VersionRange { min: 2, max: 5, cur: 4 },
            delegate: VersionRange::exactly(5),
        };
        let record = member(&snapshot);
        assert_eq!(record.addr.len(), 16);
        assert_eq!(record.status, "failed");
        assert_eq!((record.protocol_min, record.protocol_max, record.protocol_cur), (2, 5, 4));
        assert_eq!(record.tags.get("dc").map(String::as_str), Some("east"));
    }
}
