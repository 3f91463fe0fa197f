use anyhow::Result;
use assert_matches2::assert_matches;
use salamander::megolm::{
    DecryptionError, ExportedSessionKey, GroupSession, InboundGroupSession, MegolmMessage,
    SessionKey,
};

#[test]
fn group_conversation_with_multiple_receivers() -> Result<()> {
    let mut sender = GroupSession::new();

    let session_key = sender.session_key().to_base64();

    // Every receiver gets the same session key blob, usually over a
    // pair-wise encrypted channel.
    let mut first_receiver = InboundGroupSession::new(&SessionKey::from_base64(&session_key)?);
    let mut second_receiver = InboundGroupSession::new(&SessionKey::from_base64(&session_key)?);

    for i in 0..5 {
        let plaintext = format!("Group message {i}");
        let message = sender.encrypt(&plaintext);

        let first = first_receiver.decrypt(&message)?;
        let second = second_receiver.decrypt(&message)?;

        assert_eq!(first.plaintext, plaintext.as_bytes());
        assert_eq!(first, second);
        assert_eq!(first.message_index, i);
    }

    assert_eq!(sender.message_index(), 5);

    Ok(())
}

#[test]
fn skipped_group_messages_remain_decryptable() -> Result<()> {
    let mut sender = GroupSession::new();
    let mut receiver = InboundGroupSession::new(&sender.session_key());

    let messages: Vec<_> = (0..5).map(|i| sender.encrypt(format!("Message {i}"))).collect();

    for &i in &[0usize, 3, 1, 4, 2] {
        let decrypted = receiver.decrypt(&messages[i])?;

        assert_eq!(decrypted.plaintext, format!("Message {i}").as_bytes());
        assert_eq!(decrypted.message_index, i as u32);
    }

    Ok(())
}

#[test]
fn messages_survive_base64_transport() -> Result<()> {
    let mut sender = GroupSession::new();
    let mut receiver = InboundGroupSession::new(&sender.session_key());

    let message = sender.encrypt("It's a secret to everybody");
    let encoded = message.to_base64();

    let transported = MegolmMessage::from_base64(&encoded)?;
    assert_eq!(transported.to_base64(), encoded);

    let decrypted = receiver.decrypt(&transported)?;
    assert_eq!(decrypted.plaintext, b"It's a secret to everybody");

    Ok(())
}

#[test]
fn export_and_import_at_an_index() -> Result<()> {
    let mut sender = GroupSession::new();
    let mut receiver = InboundGroupSession::new(&sender.session_key());

    let first = sender.encrypt("An early message");
    let second = sender.encrypt("A later message");

    // An export taken at index 1 can decrypt the second message but not the
    // first.
    let export = receiver.export_at(1).expect("Index 1 is ahead of the first known index");
    let export = ExportedSessionKey::from_base64(&export.to_base64())?;

    let mut imported = InboundGroupSession::import(&export);

    assert_eq!(imported.session_id(), receiver.session_id());
    assert_eq!(imported.first_known_index(), 1);

    let decrypted = imported.decrypt(&second)?;
    assert_eq!(decrypted.plaintext, b"A later message");

    assert_matches!(
        imported.decrypt(&first),
        Err(DecryptionError::UnknownMessageIndex(1, 0))
    );

    // The original receiver still decrypts both.
    assert_eq!(receiver.decrypt(&first)?.plaintext, b"An early message");

    Ok(())
}

#[test]
fn advancing_discards_old_indices() -> Result<()> {
    let mut sender = GroupSession::new();
    let mut receiver = InboundGroupSession::new(&sender.session_key());

    let early = sender.encrypt("An early message");
    for _ in 0..99 {
        sender.encrypt("Filler");
    }
    let late = sender.encrypt("A late message");

    assert!(receiver.advance_to(100));

    assert_matches!(
        receiver.decrypt(&early),
        Err(DecryptionError::UnknownMessageIndex(100, 0))
    );
    assert_eq!(receiver.decrypt(&late)?.plaintext, b"A late message");

    Ok(())
}

#[test]
fn messages_from_a_different_session_are_rejected() -> Result<()> {
    let mut sender = GroupSession::new();
    let mut impostor = GroupSession::new();

    let mut receiver = InboundGroupSession::new(&sender.session_key());

    let message = impostor.encrypt("Pay no attention to the signature");

    assert_matches!(receiver.decrypt(&message), Err(DecryptionError::Signature(_)));

    Ok(())
}

#[test]
fn inbound_pickles_keep_decrypting() -> Result<()> {
    let pickle_key = b"A pickle key for the integration";

    let mut sender = GroupSession::new();
    let receiver = InboundGroupSession::new(&sender.session_key());

    let message = sender.encrypt("Sent while the receiver was pickled");

    let pickle = receiver.pickle(pickle_key);
    let mut restored = InboundGroupSession::from_pickle(&pickle, pickle_key)?;

    assert_eq!(restored.session_id(), sender.session_id());

    let decrypted = restored.decrypt(&message)?;
    assert_eq!(decrypted.plaintext, b"Sent while the receiver was pickled");

    Ok(())
}

#[test]
fn outbound_pickles_continue_the_ratchet() -> Result<()> {
    let pickle_key = b"A pickle key for the integration";

    let mut sender = GroupSession::new();
    let mut receiver = InboundGroupSession::new(&sender.session_key());

    sender.encrypt("Advance the ratchet");

    let pickle = sender.pickle(pickle_key);
    let mut restored = GroupSession::from_pickle(&pickle, pickle_key)?;

    assert_eq!(restored.session_id(), sender.session_id());
    assert_eq!(restored.message_index(), 1);

    let message = restored.encrypt("Sent by the restored session");
    let decrypted = receiver.decrypt(&message)?;

    assert_eq!(decrypted.plaintext, b"Sent by the restored session");
    assert_eq!(decrypted.message_index, 1);

    Ok(())
}
