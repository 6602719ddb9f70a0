//! RFC 6120 resource binding and XEP-0386 Bind 2.

use minidom::Element;
use xmpp_parsers::bind::{BindQuery, BindResponse};
use xmpp_parsers::bind2;
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::jid::{FullJid, Jid};

use super::stanza;
use crate::error::BindError;

/// `<iq type='set'><bind><resource/></bind></iq>`
pub fn request(id: &str, resource: Option<&str>) -> Element {
    Iq::from_set(id, BindQuery::new(resource.map(str::to_owned))).into()
}

/// Extract the bound JID from the answer to [`request`].
pub fn parse_response(iq: &Element) -> Result<Jid, BindError> {
    let iq = Iq::try_from(iq.clone()).map_err(|e| BindError::InvalidResponse(e.to_string()))?;
    match iq.payload {
        IqType::Result(Some(payload)) => {
            let bind = BindResponse::try_from(payload)
                .map_err(|e| BindError::InvalidResponse(e.to_string()))?;
            Ok(Jid::from(FullJid::from(bind)))
        }
        IqType::Result(None) => Err(BindError::InvalidResponse("missing <bind/>".to_owned())),
        IqType::Error(error) => Err(BindError::Rejected {
            condition: Some(stanza::condition_name(&error)),
        }),
        IqType::Get(_) | IqType::Set(_) => Err(BindError::InvalidResponse(
            "bind request answered with a request".to_owned(),
        )),
    }
}

/// XEP-0386 `<bind/>` for inclusion in a SASL2 `<authenticate/>`.
pub fn bind2(tag: Option<&str>, payloads: Vec<Element>) -> Element {
    bind2::BindQuery {
        tag: tag.map(str::to_owned),
        payloads,
    }
    .into()
}
