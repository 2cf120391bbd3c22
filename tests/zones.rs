use pretty_assertions::assert_eq;
use rdns::zones::Zone;
use rdns::{Class, Question, Resource, Type};
use std::fs;

#[test]
fn test_load_with_include() {
    let dir = tempfile::tempdir().unwrap();

    fs::write(
        dir.path().join("example.com.zone"),
        "\
$TTL 1h
@        IN SOA ns1 hostmaster 2024010101 2h 1h 2w 5m
         IN NS  ns1
ns1      IN A   192.0.2.53
$INCLUDE hosts/www.inc www
",
    )
    .unwrap();

    fs::create_dir(dir.path().join("hosts")).unwrap();
    fs::write(
        dir.path().join("hosts/www.inc"),
        "\
@     A    192.0.2.80
@     AAAA 2001:db8::80
blog  CNAME @
",
    )
    .unwrap();

    let zone = Zone::load(dir.path().join("example.com.zone"), "example.com").unwrap();
    assert_eq!(zone.records().len(), 6);

    let www = zone.lookup(&Question::new("www.example.com", Type::AAAA, Class::Internet));
    assert_eq!(www.len(), 1);
    assert_eq!(www[0].ttl, 3600);
    assert_eq!(www[0].resource, Resource::AAAA("2001:db8::80".parse().unwrap()));

    let blog = zone.lookup(&Question::new("blog.www.example.com", Type::CNAME, Class::Internet));
    assert_eq!(
        blog[0].resource,
        Resource::CNAME("www.example.com".to_string())
    );

    // The NS answer carries the name server's address.
    let ns = zone
        .message(&Question::new("example.com", Type::NS, Class::Internet))
        .unwrap();
    assert!(ns.aa);
    assert_eq!(ns.additionals.len(), 1);
    assert_eq!(ns.additionals[0].name, "ns1.example.com");
}

#[test]
fn test_load_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.zone");
    fs::write(&path, "$TTL 60\n@ IN A 192.0.2.1\n$INCLUDE missing.inc\n").unwrap();

    let err = Zone::load(&path, "example.com").unwrap_err().to_string();
    assert!(err.starts_with(&format!("{}:3:", path.display())), "{}", err);

    assert!(Zone::load(dir.path().join("nope.zone"), "example.com").is_err());
}
