//! Property tests for trace propagation, error classification and role checks.

use std::sync::Arc;

use dispatch_core::gate::AccessGate;
use dispatch_core::policy::{AllRoles, AnyRole, HasRole};
use dispatch_core::span::{NoopExporter, Tracer};
use dispatch_core::trace::{decode, encode};
use dispatch_core::{classify, DispatchError, ErrorKind, ErrorSpec, Principal};
use proptest::prelude::*;

fn arb_kind() -> impl Strategy<Value = ErrorKind> {
    prop_oneof![
        Just(ErrorKind::BadRequest),
        Just(ErrorKind::Unauthorized),
        Just(ErrorKind::Forbidden),
        Just(ErrorKind::NotFound),
        Just(ErrorKind::MissingParameter),
        Just(ErrorKind::UnsupportedEnumValue),
        Just(ErrorKind::DatabaseError),
        Just(ErrorKind::UnknownError),
    ]
}

fn arb_roles() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop::string::string_regex("[A-Z]{2,6}").unwrap(), 0..4)
}

proptest! {
    /// Well-formed headers decode to exactly the ids they carry.
    #[test]
    fn decode_reads_well_formed_headers(
        trace in 1u128..,
        span in 1u64..,
        flags in any::<u8>(),
    ) {
        let header = format!("00-{:032x}-{:016x}-{:02x}", trace, span, flags);
        let parent = decode(&header).unwrap();

        prop_assert_eq!(parent.trace_id.0, trace);
        prop_assert_eq!(parent.span_id.0, span);
        prop_assert_eq!(parent.sampled, flags & 1 == 1);
    }

    /// Short hex parts read as if left-padded with zeros.
    #[test]
    fn short_parts_are_left_padded(trace in 1u128..=0xffff_ffff, span in 1u64..=0xffff) {
        let short = format!("00-{:x}-{:x}-01", trace, span);
        let padded = format!("00-{:032x}-{:016x}-01", trace, span);

        prop_assert_eq!(decode(&short), decode(&padded));
    }

    /// Decoding arbitrary input never panics.
    #[test]
    fn decode_never_panics(header in ".*") {
        let _ = decode(&header);
    }

    /// Decoding dash-heavy hex noise never panics either.
    #[test]
    fn decode_never_panics_on_hex_noise(header in "[0-9a-fA-F-]{0,64}") {
        let _ = decode(&header);
    }

    /// A continued span keeps the trace, and its header names the new span.
    #[test]
    fn continuation_round_trips(trace in 1u128.., span in 1u64.., sampled in any::<bool>()) {
        let header = format!("00-{:032x}-{:016x}-{:02x}", trace, span, u8::from(sampled));
        let parent = decode(&header).unwrap();

        let tracer = Tracer::new(Arc::new(NoopExporter));
        let child = tracer.start_span("child", Some(&parent));
        let forwarded = decode(&encode(&child)).unwrap();

        prop_assert_eq!(forwarded.trace_id, parent.trace_id);
        prop_assert_eq!(forwarded.span_id, child.span_id());
        prop_assert_eq!(child.parent_span_id(), Some(parent.span_id));
        prop_assert_eq!(forwarded.sampled, sampled);
        child.end_ok();
    }

    /// Classification is a fixed point on already-tagged errors.
    #[test]
    fn classify_is_idempotent(kind in arb_kind(), message in "[a-z ]{0,20}") {
        let spec = ErrorSpec::new(kind, message);
        let once = classify(&spec.clone().into_error());
        let twice = classify(&once.clone().into_error());

        prop_assert_eq!(&once, &spec);
        prop_assert_eq!(once, twice);
    }

    /// Untagged failures always classify as server errors.
    #[test]
    fn untagged_errors_are_unknown(message in "[a-z ]{1,20}") {
        let spec = classify(&DispatchError::unhandled(message.clone()));

        prop_assert_eq!(spec.kind, ErrorKind::UnknownError);
        prop_assert_eq!(spec.status, 500);
        prop_assert_eq!(spec.message, message);
    }

    /// Role requirements agree with the principal's role set.
    #[test]
    fn role_checks_match_role_membership(roles in arb_roles(), wanted in arb_roles()) {
        let principal = Principal::new("u", "user").with_roles(roles.iter().cloned());

        for role in &wanted {
            let gate = AccessGate::new().require(HasRole::named(role.clone()));
            prop_assert_eq!(gate.check_roles(&principal).is_ok(), roles.contains(role));
        }

        let any = AccessGate::new().require(AnyRole::of(wanted.iter().cloned()));
        prop_assert_eq!(
            any.check_roles(&principal).is_ok(),
            wanted.iter().any(|r| roles.contains(r))
        );

        let all = AccessGate::new().require(AllRoles::of(wanted.iter().cloned()));
        prop_assert_eq!(
            all.check_roles(&principal).is_ok(),
            wanted.iter().all(|r| roles.contains(r))
        );
    }

    /// Role failures are always Forbidden, never anything else.
    #[test]
    fn role_failures_are_forbidden(roles in arb_roles()) {
        let principal = Principal::new("u", "user").with_roles(roles);
        let gate = AccessGate::new().require(HasRole::named("lowercase-never-generated"));

        let err = gate.check_roles(&principal).unwrap_err();
        prop_assert_eq!(err.kind, ErrorKind::Forbidden);
        prop_assert_eq!(err.status, 403);
    }
}
