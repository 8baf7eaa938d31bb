use rstest::rstest;
use xylem::output::build::{Event, EventRecorder};
use xylem::output::{HostLanguage, Receiver};
use xylem::tree::SimpleNode;
use xylem::{ComplexContentOutputter, ErrorCode, QName};

fn recorder() -> EventRecorder<SimpleNode> {
    EventRecorder::new()
}

#[rstest]
fn attributes_are_buffered_until_content_starts() {
    let mut sink = recorder();
    {
        let mut out = ComplexContentOutputter::new(&mut sink, HostLanguage::Xslt);
        out.start_element(&QName::local_name("e")).unwrap();
        out.attribute(&QName::local_name("a"), "1").unwrap();
        out.attribute(&QName::local_name("b"), "2").unwrap();
        out.characters("hi").unwrap();
        out.end_element().unwrap();
    }
    assert_eq!(
        sink.events,
        vec![
            Event::StartElement("e".into()),
            Event::Attribute("a".into(), "1".into()),
            Event::Attribute("b".into(), "2".into()),
            Event::StartContent,
            Event::Characters("hi".into()),
            Event::EndElement,
        ]
    );
}

#[rstest]
fn attribute_after_content_is_rejected() {
    let mut sink = recorder();
    let mut out = ComplexContentOutputter::new(&mut sink, HostLanguage::Xslt);
    out.start_element(&QName::local_name("e")).unwrap();
    out.characters("text").unwrap();
    let err = out.attribute(&QName::local_name("late"), "x").unwrap_err();
    assert_eq!(err.code, ErrorCode::XTDE0410);
}

#[rstest]
fn attribute_after_content_is_rejected_for_xquery_too() {
    let mut sink = recorder();
    let mut out = ComplexContentOutputter::new(&mut sink, HostLanguage::Xquery);
    out.start_element(&QName::local_name("e")).unwrap();
    out.characters("text").unwrap();
    let err = out.attribute(&QName::local_name("late"), "x").unwrap_err();
    assert_eq!(err.code, ErrorCode::XQTY0024);
}

#[rstest]
fn duplicate_attribute_overwrites_in_xslt() {
    let mut sink = recorder();
    {
        let mut out = ComplexContentOutputter::new(&mut sink, HostLanguage::Xslt);
        out.start_element(&QName::local_name("e")).unwrap();
        out.attribute(&QName::local_name("a"), "first").unwrap();
        out.attribute(&QName::local_name("a"), "second").unwrap();
        out.start_content().unwrap();
        out.end_element().unwrap();
    }
    assert!(
        sink.events
            .contains(&Event::Attribute("a".into(), "second".into()))
    );
    assert!(
        !sink
            .events
            .contains(&Event::Attribute("a".into(), "first".into()))
    );
}

#[rstest]
fn duplicate_attribute_is_an_error_in_xquery() {
    let mut sink = recorder();
    let mut out = ComplexContentOutputter::new(&mut sink, HostLanguage::Xquery);
    out.start_element(&QName::local_name("e")).unwrap();
    out.attribute(&QName::local_name("a"), "first").unwrap();
    let err = out.attribute(&QName::local_name("a"), "second").unwrap_err();
    assert_eq!(err.code, ErrorCode::XQDY0025);
}

#[rstest]
fn conflicting_attribute_prefix_gets_a_substitute() {
    let mut sink = recorder();
    {
        let mut out = ComplexContentOutputter::new(&mut sink, HostLanguage::Xslt);
        out.start_element(&QName::prefixed("p", "http://one/", "e"))
            .unwrap();
        out.attribute(&QName::prefixed("p", "http://two/", "a"), "v")
            .unwrap();
        out.start_content().unwrap();
        out.end_element().unwrap();
    }
    assert!(sink.events.contains(&Event::Namespace(
        "p".into(),
        "http://one/".into()
    )));
    assert!(sink.events.contains(&Event::Namespace(
        "p_1".into(),
        "http://two/".into()
    )));
    assert!(sink.events.contains(&Event::Attribute("p_1:a".into(), "v".into())));
}

#[rstest]
fn explicit_conflicting_namespace_nodes_are_an_error() {
    let mut sink = recorder();
    let mut out = ComplexContentOutputter::new(&mut sink, HostLanguage::Xslt);
    out.start_element(&QName::local_name("e")).unwrap();
    out.namespace("p", "http://one/").unwrap();
    let err = out.namespace("p", "http://two/").unwrap_err();
    assert_eq!(err.code, ErrorCode::XTDE0430);
}

#[rstest]
fn default_namespace_on_a_no_namespace_element_is_rejected() {
    let mut sink = recorder();
    let mut out = ComplexContentOutputter::new(&mut sink, HostLanguage::Xslt);
    out.start_element(&QName::local_name("e")).unwrap();
    out.namespace("", "http://default/").unwrap();
    let err = out.start_content().unwrap_err();
    assert_eq!(err.code, ErrorCode::XTDE0440);
}

#[rstest]
fn namespaced_attribute_without_prefix_gets_a_generated_one() {
    let mut sink = recorder();
    {
        let mut out = ComplexContentOutputter::new(&mut sink, HostLanguage::Xslt);
        out.start_element(&QName::local_name("e")).unwrap();
        out.attribute(&QName::with_ns("http://a/", "attr"), "v")
            .unwrap();
        out.start_content().unwrap();
        out.end_element().unwrap();
    }
    assert!(sink.events.contains(&Event::Namespace(
        "ns_1".into(),
        "http://a/".into()
    )));
    assert!(
        sink.events
            .contains(&Event::Attribute("ns_1:attr".into(), "v".into()))
    );
}
