// Copyright 2024 The salamander developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! An implementation of the Megolm group ratchet.
//!
//! Megolm is a cryptographic ratchet for encrypted communication between a
//! single sender and many receivers. The sender's state lives in a
//! [`GroupSession`]: a hash ratchet producing a fresh message key for every
//! message, and an Ed25519 key pair whose signatures let receivers
//! authenticate the sender.
//!
//! Receivers hold an [`InboundGroupSession`], created from the sender's
//! [`SessionKey`]. The inbound session can fast-forward its ratchet to any
//! later index, so messages may be decrypted out of order, but it can never
//! step backwards: exporting and importing a session at index `i` gives up
//! the ability to decrypt anything older than `i`.

mod group_session;
mod inbound_group_session;
mod message;
mod ratchet;
mod session_keys;

pub use group_session::GroupSession;
pub use inbound_group_session::{DecryptedMessage, DecryptionError, InboundGroupSession};
pub use message::MegolmMessage;
pub use session_keys::{ExportedSessionKey, SessionKey, SessionKeyDecodeError};

#[cfg(test)]
mod test {
    use assert_matches2::assert_matches;

    use super::{
        DecryptionError, ExportedSessionKey, GroupSession, InboundGroupSession, MegolmMessage,
        SessionKey,
    };

    #[test]
    fn group_message_round_trip() {
        let mut session = GroupSession::new();
        let session_key = session.session_key();

        let mut inbound = InboundGroupSession::new(&session_key);

        assert_eq!(session.session_id(), inbound.session_id());

        let plaintext = "It's a secret to everybody";
        let message = session.encrypt(plaintext);

        let decrypted = inbound.decrypt(&message).expect("The message should decrypt");

        assert_eq!(decrypted.plaintext, plaintext.as_bytes());
        assert_eq!(decrypted.message_index, 0);

        let second = session.encrypt("Another secret");
        let decrypted = inbound.decrypt(&second).expect("The second message should decrypt");

        assert_eq!(decrypted.plaintext, b"Another secret");
        assert_eq!(decrypted.message_index, 1);
    }

    #[test]
    fn out_of_order_group_messages_decrypt() {
        let mut session = GroupSession::new();
        let mut inbound = InboundGroupSession::new(&session.session_key());

        let first = session.encrypt("Message 1");
        let second = session.encrypt("Message 2");
        let third = session.encrypt("Message 3");

        let decrypted = inbound.decrypt(&third).expect("A skipped-ahead message should decrypt");
        assert_eq!(decrypted.message_index, 2);

        let decrypted = inbound.decrypt(&first).expect("An earlier message should decrypt");
        assert_eq!(decrypted.message_index, 0);

        let decrypted = inbound.decrypt(&second).expect("The in-between message should decrypt");
        assert_eq!(decrypted.message_index, 1);
    }

    #[test]
    fn large_index_jumps_decrypt() {
        let mut session = GroupSession::new();
        let mut inbound = InboundGroupSession::new(&session.session_key());

        for _ in 0..2000 {
            session.encrypt("Spam");
        }

        let message = session.encrypt("The tail of a long conversation");
        let decrypted = inbound.decrypt(&message).expect("The message should decrypt");

        assert_eq!(decrypted.message_index, 2000);
        assert_eq!(decrypted.plaintext, b"The tail of a long conversation");
    }

    #[test]
    fn sessions_shared_at_a_later_index_cannot_decrypt_earlier_messages() {
        let mut session = GroupSession::new();

        let early_message = session.encrypt("An early message");

        // The session key is created after the first encryption, so it
        // starts at index 1.
        let mut inbound = InboundGroupSession::new(&session.session_key());
        assert_eq!(inbound.first_known_index(), 1);

        assert_matches!(
            inbound.decrypt(&early_message),
            Err(DecryptionError::UnknownMessageIndex(1, 0))
        );

        let late_message = session.encrypt("A late message");
        let decrypted = inbound.decrypt(&late_message).expect("The late message should decrypt");

        assert_eq!(decrypted.message_index, 1);
    }

    #[test]
    fn exported_sessions_decrypt() {
        let mut session = GroupSession::new();
        let mut inbound = InboundGroupSession::new(&session.session_key());

        let message = session.encrypt("It's a secret to everybody");

        let export = inbound.export_at(0).expect("The initial index is exportable");
        let mut imported = InboundGroupSession::import(&export);

        let decrypted =
            imported.decrypt(&message).expect("The imported session should decrypt");
        assert_eq!(decrypted.plaintext, b"It's a secret to everybody");

        // The export format also round-trips through base64.
        let export = inbound.export_at(0).expect("The initial index is exportable");
        let reimported = ExportedSessionKey::from_base64(&export.to_base64())
            .expect("Our own export should decode");
        let mut reimported = InboundGroupSession::import(&reimported);

        assert_eq!(
            reimported.decrypt(&message).expect("The re-imported session should decrypt"),
            decrypted
        );
    }

    #[test]
    fn exports_below_the_first_known_index_are_refused() {
        let mut session = GroupSession::new();
        session.encrypt("Advance the ratchet");

        let mut inbound = InboundGroupSession::new(&session.session_key());

        assert_eq!(inbound.first_known_index(), 1);
        assert!(inbound.export_at(0).is_none(), "Exporting below the first known index is refused");
        assert!(inbound.export_at(1).is_some());
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let mut session = GroupSession::new();
        let mut inbound = InboundGroupSession::new(&session.session_key());

        let message = session.encrypt("It's a secret to everybody");
        let mut bytes = message.to_bytes();

        // Flip a bit inside the ciphertext, skipping the version, the index
        // field and the ciphertext tag and length. The signature covers it.
        bytes[6] ^= 0b1;
        let tampered = MegolmMessage::from_bytes(&bytes).expect("The message still decodes");

        assert_matches!(inbound.decrypt(&tampered), Err(DecryptionError::Signature(_)));
    }

    #[test]
    fn session_key_base64_transport() {
        let session = GroupSession::new();
        let encoded = session.session_key().to_base64();

        let decoded = SessionKey::from_base64(&encoded)
            .expect("A session key should survive base64 transport");
        let inbound = InboundGroupSession::new(&decoded);

        assert_eq!(session.session_id(), inbound.session_id());
    }
}
