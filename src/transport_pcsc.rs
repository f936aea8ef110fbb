//! PC/SC-backed `Transport`, using a card transaction per exchange the way
//! a real reader driver expects.

use std::time::Instant;

use tracing::{info, warn};

use crate::apdu::{Request, Response};
use crate::errors::{Error, Result};
use crate::transport::{ApduLogEntry, Transport};

pub struct PcscTransport {
    context: pcsc::Context,
    card: pcsc::Card,
    pub log: Vec<ApduLogEntry>,
}

impl PcscTransport {
    pub fn connect(reader_name: &std::ffi::CStr) -> Result<Self> {
        let context = pcsc::Context::establish(pcsc::Scope::User).map_err(Error::Pcsc)?;
        let card = context
            .connect(reader_name, pcsc::ShareMode::Shared, pcsc::Protocols::ANY)
            .map_err(Error::Pcsc)?;
        Ok(Self {
            context,
            card,
            log: Vec::new(),
        })
    }

    pub fn list_readers(context: &pcsc::Context) -> Result<Vec<std::ffi::CString>> {
        let mut buf = vec![0u8; context.list_readers_len().map_err(Error::Pcsc)?];
        Ok(context
            .list_readers(&mut buf)
            .map_err(Error::Pcsc)?
            .map(|name| name.to_owned())
            .collect())
    }

    pub fn disconnect(self) {
        let _ = self.card.disconnect(pcsc::Disposition::LeaveCard);
        drop(self.context);
    }
}

impl Transport for PcscTransport {
    fn call_raw_apdu(&mut self, req: &Request) -> Result<Response> {
        let started = Instant::now();
        let wire = req.encode();
        info!(
            cla = format_args!("{:02X}", req.cla),
            ins = format_args!("{:02X}", req.ins),
            lc = req.data.len(),
            "sending APDU"
        );

        let mut recv_buf = [0u8; pcsc::MAX_BUFFER_SIZE];
        let raw = self
            .card
            .transmit(&wire, &mut recv_buf)
            .map_err(Error::Pcsc)?
            .to_vec();

        let response = Response::from_wire(raw).ok_or_else(|| {
            warn!("card returned a response shorter than two bytes");
            Error::CardLost
        })?;

        self.log.push(ApduLogEntry::new(String::new(), wire, &response, started.elapsed()));

        Ok(response)
    }
}
