//! Event stream filter expressions.
//!
//! A filter is a comma-separated list of tokens. `*` matches everything,
//! member event names match that membership change, `user` and `query`
//! match every event of that kind, and `user:NAME` or `query:NAME` narrow
//! the match to one event name.

use std::str::FromStr;

use tattle_proto::ProtocolError;

use crate::agent::{Event, MemberEventKind};

const MEMBER_KINDS: [MemberEventKind; 5] = [
    MemberEventKind::Join,
    MemberEventKind::Leave,
    MemberEventKind::Failed,
    MemberEventKind::Update,
    MemberEventKind::Reap,
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum FilterToken {
    Any,
    Member(MemberEventKind),
    User(Option<String>),
    Query(Option<String>),
}

impl FilterToken {
    fn matches(&self, event: &Event) -> bool {
        match (self, event) {
            (Self::Any, _) => true,
            (Self::Member(kind), Event::Member(member)) => member.kind == *kind,
            (Self::User(name), Event::User(user)) => name_matches(name.as_deref(), &user.name),
            (Self::Query(name), Event::Query(query)) => name_matches(name.as_deref(), &query.name),
            _ => false,
        }
    }
}

fn name_matches(wanted: Option<&str>, actual: &str) -> bool {
    wanted.is_none_or(|wanted| wanted == actual)
}

impl FromStr for FilterToken {
    type Err = ProtocolError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let token = token.trim();
        if token == "*" {
            return Ok(Self::Any);
        }
        if let Some(kind) = MEMBER_KINDS.iter().find(|kind| kind.as_str() == token) {
            return Ok(Self::Member(*kind));
        }
        match token.split_once(':') {
            None if token == "user" => Ok(Self::User(None)),
            None if token == "query" => Ok(Self::Query(None)),
            Some(("user", name)) if !name.is_empty() => Ok(Self::User(Some(name.to_owned()))),
            Some(("query", name)) if !name.is_empty() => Ok(Self::Query(Some(name.to_owned()))),
            _ => Err(ProtocolError::InvalidFilter),
        }
    }
}

/// Parsed filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EventFilter {
    tokens: Vec<FilterToken>,
}

impl EventFilter {
    /// True when any token admits `event`.
    pub(crate) fn matches(&self, event: &Event) -> bool {
        self.tokens.iter().any(|token| token.matches(event))
    }
}

impl FromStr for EventFilter {
    type Err = ProtocolError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let tokens = expression
            .split(',')
            .map(str::parse)
            .collect::<Result<Vec<FilterToken>, _>>()?;
        Ok(Self { tokens })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::agent::{MemberEvent, QueryEvent, UserEvent};

    fn user(name: &str) -> Event {
        Event::User(UserEvent {
            ltime: 1,
            name: name.to_owned(),
            payload: Vec::new(),
            coalesce: false,
        })
    }

    fn query(name: &str) -> Event {
        Event::Query(QueryEvent {
            id: 1,
            ltime: 1,
            name: name.to_owned(),
            payload: Vec::new(),
        })
    }

    fn member(kind: MemberEventKind) -> Event {
        Event::Member(MemberEvent {
            kind,
            members: Vec::new(),
        })
    }

    #[rstest]
    #[case::wildcard("*", member(MemberEventKind::Reap), true)]
    #[case::member_kind("member-join", member(MemberEventKind::Join), true)]
    #[case::other_member_kind("member-join", member(MemberEventKind::Leave), false)]
    #[case::any_user("user", user("deploy"), true)]
    #[case::named_user("user:deploy", user("deploy"), true)]
    #[case::other_user("user:deploy", user("restart"), false)]
    #[case::named_query("query:ping", query("ping"), true)]
    #[case::user_is_not_query("user", query("ping"), false)]
    #[case::list("member-failed, user:deploy", user("deploy"), true)]
    fn filter_matching(#[case] expression: &str, #[case] event: Event, #[case] expected: bool) {
        let filter: EventFilter = expression.parse().expect("valid filter");
        assert_eq!(filter.matches(&event), expected);
    }

    #[rstest]
    #[case::unknown("member-exploded")]
    #[case::empty("")]
    #[case::trailing_comma("user,")]
    #[case::empty_name("user:")]
    #[case::bad_prefix("event:deploy")]
    fn invalid_filters_are_rejected(#[case] expression: &str) {
        let error = expression.parse::<EventFilter>().expect_err("invalid");
        assert_eq!(error, ProtocolError::InvalidFilter);
        assert_eq!(error.to_string(), "Invalid event filter");
    }
}
