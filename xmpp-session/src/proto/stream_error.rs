//! RFC 6120 stream errors.

use minidom::Element;

use super::ns;
use crate::error::ProtocolError;

/// Decode `<stream:error/>`. Returns `None` for anything else.
pub fn parse(elem: &Element) -> Option<ProtocolError> {
    if !elem.is("error", ns::STREAM) {
        return None;
    }
    let condition = elem
        .children()
        .find(|child| child.ns() == ns::XMPP_STREAMS && child.name() != "text")
        .map(|child| child.name().to_owned())
        .unwrap_or_else(|| "undefined-condition".to_owned());
    let text = elem
        .get_child("text", ns::XMPP_STREAMS)
        .map(|text| text.text());
    Some(ProtocolError::StreamError { condition, text })
}

/// Serialise a stream error, using the `stream` prefix declared by our
/// stream header.
pub fn to_xml(condition: &str, application: Option<&Element>) -> String {
    let mut xml = format!(
        "<stream:error><{} xmlns='{}'/>",
        condition,
        ns::XMPP_STREAMS
    );
    if let Some(application) = application {
        xml.push_str(&String::from(application));
    }
    xml.push_str("</stream:error>");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_conflict() {
        let elem: Element = "<error xmlns='http://etherx.jabber.org/streams'><conflict xmlns='urn:ietf:params:xml:ns:xmpp-streams'/><text xmlns='urn:ietf:params:xml:ns:xmpp-streams'>Replaced by new connection</text></error>"
            .parse()
            .unwrap();
        assert_eq!(
            parse(&elem),
            Some(ProtocolError::StreamError {
                condition: "conflict".to_owned(),
                text: Some("Replaced by new connection".to_owned()),
            })
        );
    }
}
