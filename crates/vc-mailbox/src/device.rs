use tracing::info;

use crate::channel::MailboxChannel;
use crate::config::MailboxConfig;
use crate::error::Result;
use crate::mapping::{BusMapper, DevMemMapper, MappedRegion};
use crate::vcmem::BusAddress;
use crate::{PropertyMessage, PropertyTransport};

/// A real VideoCore: the mailbox device plus `/dev/mem` for mapping locked memory.
#[derive(Debug)]
pub struct VideoCoreDevice {
    channel: MailboxChannel,
    mapper: DevMemMapper,
}

impl VideoCoreDevice {
    pub fn open(config: &MailboxConfig) -> Result<Self> {
        let channel = MailboxChannel::open(config)?;
        info!(
            "VideoCore mailbox {} ready (memory via {})",
            channel.path().display(),
            config.mem_device.display()
        );
        Ok(Self {
            channel,
            mapper: DevMemMapper::new(&config.mem_device),
        })
    }

    pub fn channel(&self) -> &MailboxChannel {
        &self.channel
    }

    pub fn close(self) {
        self.channel.close();
    }
}

impl PropertyTransport for VideoCoreDevice {
    fn transact(&mut self, msg: &mut PropertyMessage) -> Result<()> {
        self.channel.transact(msg)
    }
}

impl BusMapper for VideoCoreDevice {
    fn map(&mut self, bus: BusAddress, len: usize) -> Result<MappedRegion> {
        self.mapper.map(bus, len)
    }

    fn unmap(&mut self, region: MappedRegion) -> Result<()> {
        self.mapper.unmap(region)
    }
}
