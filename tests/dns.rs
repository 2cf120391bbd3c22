use pretty_assertions::assert_eq;
use rdns::{Class, Error, Extension, Message, Question, Rcode, Record, Resource, Type, MX, QR, TXT};

/// An answer to "example.com A", with the answer's owner compressed to a
/// pointer at the question.
const EXAMPLE_RESPONSE: &str = concat!(
    "1234", "8180", "0001", "0001", "0000", "0000",
    "076578616d706c6503636f6d00", "0001", "0001",
    "c00c", "0001", "0001", "00000e10", "0004", "5db8d822",
);

#[test]
fn test_decode_response() {
    let packet = hex::decode(EXAMPLE_RESPONSE).unwrap();
    let m = Message::from_slice(&packet).unwrap();

    assert_eq!(m.id, 0x1234);
    assert_eq!(m.qr, QR::Response);
    assert!(m.rd);
    assert!(m.ra);
    assert_eq!(m.rcode, Rcode::NoError);
    assert_eq!(
        m.questions,
        vec![Question::new("example.com", Type::A, Class::Internet)]
    );
    assert_eq!(
        m.answers,
        vec![Record::new(
            "example.com",
            Class::Internet,
            3600,
            Resource::A("93.184.216.34".parse().unwrap()),
        )]
    );

    // Encoding compresses the answer's name the same way.
    assert_eq!(hex::encode(m.to_vec().unwrap()), EXAMPLE_RESPONSE);
}

#[test]
fn test_encode_mixed_records() {
    let question = Question::new("example.com", Type::ANY, Class::Internet);
    let mut m = Message::query(question, 99, true).response(Rcode::NoError);
    m.answers.push(Record::new(
        "example.com",
        Class::Internet,
        300,
        Resource::MX(MX {
            preference: 10,
            exchange: "mail.example.com".to_string(),
        }),
    ));
    m.answers.push(Record::new(
        "example.com",
        Class::Internet,
        300,
        Resource::TXT(TXT(vec![b"v=spf1 -all".to_vec(), b"".to_vec()])),
    ));
    m.additionals.push(Record::new(
        "mail.example.com",
        Class::Internet,
        300,
        Resource::AAAA("2001:db8::25".parse().unwrap()),
    ));
    m.add_extension(Extension {
        payload_size: 1232,
        ..Default::default()
    });

    let got = Message::from_slice(&m.to_vec().unwrap()).unwrap();
    assert_eq!(got, m);
}

#[test]
fn test_malformed() {
    let packet = hex::decode(EXAMPLE_RESPONSE).unwrap();

    // Too short for a header.
    assert!(matches!(
        Message::from_slice(&packet[..11]),
        Err(Error::MalformedHeader(_))
    ));

    // Cut off in the middle of the answer.
    assert!(Message::from_slice(&packet[..packet.len() - 2]).is_err());

    // A name pointing at itself.
    let looped = hex::decode("000001000001000000000000c00c00010001").unwrap();
    assert!(Message::from_slice(&looped).is_err());
}

#[test]
fn test_error_response() {
    let packet = hex::decode(EXAMPLE_RESPONSE).unwrap();
    let response = Message::error_response(&packet, Rcode::ServFail).unwrap();

    let m = Message::from_slice(&response).unwrap();
    assert_eq!(m.id, 0x1234);
    assert_eq!(m.rcode, Rcode::ServFail);
    assert!(m.answers.is_empty());

    assert_eq!(Message::error_response(&packet[..4], Rcode::ServFail), None);
}
