use anyhow::{bail, Result};
use assert_matches2::assert_matches;
use salamander::olm::{
    Account, InboundCreationResult, MessageType, OlmMessage, Session, SessionCreationError,
};

struct Channel {
    alice: Account,
    bob: Account,
    alice_session: Session,
    bob_session: Session,
}

/// Run the pre-key handshake between two fresh accounts, returning both
/// established sessions.
fn establish_channel() -> Result<Channel> {
    let alice = Account::new();
    let mut bob = Account::new();

    bob.generate_one_time_keys(1);

    let Some(one_time_key) = bob.one_time_keys().values().copied().next() else {
        bail!("Bob should have a one-time key after generating one");
    };

    let mut alice_session = alice.create_outbound_session(bob.curve25519_key(), one_time_key)?;
    bob.mark_keys_as_published();

    let message = alice_session.encrypt("têst1");

    let OlmMessage::PreKey(pre_key_message) = message else {
        bail!("The first message of a session should be a pre-key message");
    };

    assert_eq!(pre_key_message.session_id(), alice_session.session_id());
    assert!(alice_session.matches_inbound(&pre_key_message));

    let InboundCreationResult { session: bob_session, plaintext } =
        bob.create_inbound_session_from(&alice.curve25519_key(), &pre_key_message)?;

    assert_eq!(plaintext, "têst1".as_bytes());
    assert_eq!(alice_session.session_id(), bob_session.session_id());

    Ok(Channel { alice, bob, alice_session, bob_session })
}

#[test]
fn two_party_transcript() -> Result<()> {
    let Channel { mut alice_session, mut bob_session, .. } = establish_channel()?;

    // Bob's reply is a normal message and carries type 1 on the wire.
    let reply = bob_session.encrypt("hot beverage: ☕");
    assert_eq!(reply.message_type(), MessageType::Normal);

    let (message_type, ciphertext) = reply.to_parts();
    assert_eq!(message_type, 1);

    let reply = OlmMessage::from_parts(message_type, &ciphertext)?;
    assert_eq!(alice_session.decrypt(&reply)?, "hot beverage: ☕".as_bytes());

    // Until the first decryption on Alice's side, her messages stay pre-key
    // messages with type 0; from now on they are normal ones.
    let message = alice_session.encrypt("party at your place?");
    assert_eq!(message.message_type(), MessageType::Normal);
    assert_eq!(bob_session.decrypt(&message)?, b"party at your place?");

    Ok(())
}

#[test]
fn wire_format_round_trip() -> Result<()> {
    let Channel { mut alice_session, mut bob_session, .. } = establish_channel()?;

    let message = bob_session.encrypt("A message that travels through the network");
    let (message_type, ciphertext) = message.to_parts();

    // The wire format is unpadded base64 and round-trips byte-identically.
    assert!(!ciphertext.contains('='));

    let decoded = OlmMessage::from_parts(message_type, &ciphertext)?;
    assert_eq!(decoded.to_parts().1, ciphertext);

    assert_eq!(
        alice_session.decrypt(&decoded)?,
        b"A message that travels through the network"
    );

    Ok(())
}

#[test]
fn out_of_order_delivery() -> Result<()> {
    let Channel { mut alice_session, mut bob_session, .. } = establish_channel()?;

    let messages: Vec<_> =
        (0..5).map(|i| bob_session.encrypt(format!("Message {i}"))).collect();

    // Deliver the messages in the order 0, 3, 1, 4, 2; the first message
    // has to arrive first so Alice's receiving chain exists.
    for &i in &[0usize, 3, 1, 4, 2] {
        assert_eq!(
            alice_session.decrypt(&messages[i])?,
            format!("Message {i}").as_bytes(),
            "Message {i} should decrypt correctly regardless of arrival order"
        );
    }

    Ok(())
}

#[test]
fn ratchet_advance_rotates_the_ratchet_key() -> Result<()> {
    let Channel { mut alice_session, mut bob_session, .. } = establish_channel()?;

    let first = alice_session.encrypt("first");
    bob_session.decrypt(&first)?;

    // Alice hasn't decrypted a reply yet, so her messages still use the
    // pre-key framing and the initial ratchet key.
    let OlmMessage::PreKey(before) = first else {
        bail!("A session without a received message should produce pre-key messages");
    };
    let ratchet_key_before = before.message().ratchet_key();

    let reply = bob_session.encrypt("reply");
    alice_session.decrypt(&reply)?;

    // Alice's next send happens on a fresh chain, with a ratchet key
    // distinct from the one used before Bob's reply.
    let OlmMessage::Normal(after) = alice_session.encrypt("second") else {
        bail!("An established session should produce normal messages");
    };

    assert_ne!(ratchet_key_before, after.ratchet_key());
    assert_eq!(after.chain_index(), 0, "A fresh chain starts at index zero");

    assert_eq!(bob_session.decrypt(&OlmMessage::Normal(after))?, b"second");

    Ok(())
}

#[test]
fn session_reestablishment_with_the_same_one_time_key_fails() -> Result<()> {
    let Channel { alice, mut bob, alice_session, .. } = establish_channel()?;

    // The one-time key was used up during the handshake, a pre-key message
    // against the same key must fail now.
    let used_one_time_key = alice_session.session_keys().one_time_key;
    let mut replayed_session =
        alice.create_outbound_session(bob.curve25519_key(), used_one_time_key)?;

    let OlmMessage::PreKey(replay) = replayed_session.encrypt("replay") else {
        bail!("The first message of a session should be a pre-key message");
    };

    assert_matches!(
        bob.create_inbound_session(&replay),
        Err(SessionCreationError::MissingOneTimeKey)
    );

    Ok(())
}

#[test]
fn pickle_round_trip_mid_conversation() -> Result<()> {
    let pickle_key = b"A pickle key for the integration";
    let Channel { mut alice_session, mut bob_session, .. } = establish_channel()?;

    let in_flight = bob_session.encrypt("Sent before the pickle");

    let pickle = alice_session.pickle(pickle_key);
    let mut restored = Session::from_pickle(&pickle, pickle_key)?;

    assert_eq!(restored.session_id(), alice_session.session_id());
    assert_eq!(restored.decrypt(&in_flight)?, b"Sent before the pickle");

    let message = restored.encrypt("Sent after the pickle");
    assert_eq!(bob_session.decrypt(&message)?, b"Sent after the pickle");

    Ok(())
}

#[test]
fn fallback_keys_establish_sessions_across_rotation() -> Result<()> {
    let alice = Account::new();
    let mut bob = Account::new();

    bob.generate_fallback_key();
    let Some(fallback_key) = bob.unpublished_fallback_key().values().copied().next() else {
        bail!("Bob should have an unpublished fallback key after generating one");
    };
    bob.mark_keys_as_published();

    let mut alice_session = alice.create_outbound_session(bob.curve25519_key(), fallback_key)?;
    let message = alice_session.encrypt("Delivered late, after a rotation");

    // The fallback key gets rotated before the message arrives; the old key
    // stays usable through the grace slot.
    bob.generate_fallback_key();

    let OlmMessage::PreKey(pre_key_message) = message else {
        bail!("The first message of a session should be a pre-key message");
    };

    let InboundCreationResult { plaintext, .. } = bob.create_inbound_session(&pre_key_message)?;
    assert_eq!(plaintext, b"Delivered late, after a rotation");

    // Once the old slot is forgotten, the same pre-key message can no
    // longer establish a session.
    bob.forget_old_fallback_key();
    bob.generate_fallback_key();
    bob.forget_old_fallback_key();

    assert_matches!(
        bob.create_inbound_session(&pre_key_message),
        Err(SessionCreationError::MissingOneTimeKey)
    );

    Ok(())
}
