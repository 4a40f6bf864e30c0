//! # Adapter Configuration
//!
//! Board settings consumed once at init. On real boards these come from
//! the EEPROM; here they are plain values with the chips' defaults.

use super::{
    adapter::ChipFamily,
    constants::{MAX_NARROW_TID, MAX_WIDE_TID},
    error::InitError,
};

/// The wide chip revisions, which differ in how the RISC is notified.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WideChip {
    /// ASC-3550, Ultra-Wide. Tickle values must be cleared by the host.
    Asc3550,
    /// ASC-38C0800, Ultra2-Wide.
    Asc38C0800,
    /// ASC-38C1600, Ultra3-Wide. Uses the COMMA register and supports DT.
    Asc38C1600,
}

/// Bus termination setting of the wide chips.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Termination {
    /// Let the chip detect the cable configuration.
    #[default]
    Automatic,
    /// Terminate the low byte only.
    Low,
    /// Terminate both bytes.
    HighLow,
    /// No termination.
    Off,
}

/// Settings of one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// SCSI id of the adapter itself.
    pub chip_scsi_id: u8,

    /// Targets allowed to disconnect, one bit per target id.
    pub disc_enable: u16,

    /// Targets allowed to negotiate synchronous transfers.
    pub sdtr_enable: u16,

    /// Targets allowed to negotiate wide transfers. Wide chips only.
    pub wdtr_enable: u16,

    /// Targets allowed to use tag queuing.
    pub tagqng_enable: u16,

    /// Requests the adapter keeps in flight. On the narrow chip this is the
    /// number of LRAM queue slots.
    pub max_host_qng: u8,

    /// Per device queue depth of untagged targets (narrow) or of all
    /// targets (wide).
    pub max_dvc_qng: u8,

    /// Per target queue depth once tag queuing is active. Narrow only.
    pub max_tag_qng: [u8; 8],

    /// Initial SDTR data per target, `(period index << 4) | offset`. Narrow
    /// only.
    pub sdtr_data: [u8; 8],

    /// Use the Ultra period table. Narrow only.
    pub ultra: bool,

    /// Wide chip revision.
    pub wide_chip: WideChip,

    /// Wide termination.
    pub termination: Termination,

    /// Scatter-gather blocks in the wide SG pool.
    pub sg_blocks: u16,

    /// Reset the SCSI bus while initializing.
    pub reset_bus_on_init: bool,

    /// Seconds to wait after a bus reset before the first command.
    pub scsi_reset_wait_secs: u8,
}

/// Narrow defaults.
pub mod narrow_defaults {
    /// Number of LRAM queue slots.
    pub const MAX_TOTAL_QNG: u8 = 0xF0;
    /// Depth of untagged targets.
    pub const SCSI1_QNG: u8 = 4;
    /// Depth of tagged targets.
    pub const MAX_TAG_QNG: u8 = 0x3F;
    /// Fastest period index with maximum offset.
    pub const SDTR_DATA: u8 = 0x0F;
    /// Fewest slots a usable adapter needs.
    pub const MIN_TOTAL_QNG: u8 = 8;
}

/// Wide defaults.
pub mod wide_defaults {
    /// Requests in flight.
    pub const MAX_HOST_QNG: u8 = 0xFD;
    /// Depth per target.
    pub const MAX_DVC_QNG: u8 = 0x3F;
    /// SG blocks.
    pub const SG_BLOCKS: u16 = 0xFD;
    /// Fewest requests a usable adapter needs.
    pub const MIN_HOST_QNG: u8 = 16;
}

impl AdapterConfig {
    /// Defaults for a narrow board.
    #[must_use]
    pub const fn narrow() -> Self {
        Self {
            chip_scsi_id: MAX_NARROW_TID,
            disc_enable: 0xFF,
            sdtr_enable: 0xFF,
            wdtr_enable: 0,
            tagqng_enable: 0xFF,
            max_host_qng: narrow_defaults::MAX_TOTAL_QNG,
            max_dvc_qng: narrow_defaults::SCSI1_QNG,
            max_tag_qng: [narrow_defaults::MAX_TAG_QNG; 8],
            sdtr_data: [narrow_defaults::SDTR_DATA; 8],
            ultra: false,
            wide_chip: WideChip::Asc3550,
            termination: Termination::Automatic,
            sg_blocks: 0,
            reset_bus_on_init: false,
            scsi_reset_wait_secs: 3,
        }
    }

    /// Defaults for a wide board of the given revision.
    #[must_use]
    pub const fn wide(chip: WideChip) -> Self {
        Self {
            chip_scsi_id: 7,
            disc_enable: 0xFFFF,
            sdtr_enable: 0xFFFF,
            wdtr_enable: 0xFFFF,
            tagqng_enable: 0xFFFF,
            max_host_qng: wide_defaults::MAX_HOST_QNG,
            max_dvc_qng: wide_defaults::MAX_DVC_QNG,
            max_tag_qng: [wide_defaults::MAX_DVC_QNG; 8],
            sdtr_data: [0; 8],
            ultra: false,
            wide_chip: chip,
            termination: Termination::Automatic,
            sg_blocks: wide_defaults::SG_BLOCKS,
            reset_bus_on_init: false,
            scsi_reset_wait_secs: 3,
        }
    }

    /// Check the settings for a board of `family`.
    pub fn validate(&self, family: ChipFamily) -> Result<(), InitError> {
        match family {
            ChipFamily::Narrow => self.validate_narrow(),
            ChipFamily::Wide => self.validate_wide(),
        }
    }

    /// Check the settings of a narrow board.
    pub fn validate_narrow(&self) -> Result<(), InitError> {
        if self.chip_scsi_id > MAX_NARROW_TID {
            return Err(InitError::InvalidConfig("narrow adapter SCSI id above 7"));
        }

        if !(narrow_defaults::MIN_TOTAL_QNG..=narrow_defaults::MAX_TOTAL_QNG)
            .contains(&self.max_host_qng)
        {
            return Err(InitError::InvalidConfig("narrow queue count out of range"));
        }

        if self.max_dvc_qng == 0 || self.max_tag_qng.contains(&0) {
            return Err(InitError::InvalidConfig("zero device queue depth"));
        }

        Ok(())
    }

    /// Check the settings of a wide board.
    pub fn validate_wide(&self) -> Result<(), InitError> {
        if self.chip_scsi_id > MAX_WIDE_TID {
            return Err(InitError::InvalidConfig("wide adapter SCSI id above 15"));
        }

        if !(wide_defaults::MIN_HOST_QNG..=wide_defaults::MAX_HOST_QNG)
            .contains(&self.max_host_qng)
        {
            return Err(InitError::InvalidConfig("wide host queue depth out of range"));
        }

        if self.max_dvc_qng == 0 {
            return Err(InitError::InvalidConfig("zero device queue depth"));
        }

        if self.sg_blocks == 0 {
            return Err(InitError::InvalidConfig("empty scatter-gather pool"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(AdapterConfig::narrow().validate(ChipFamily::Narrow), Ok(()));
        assert_eq!(
            AdapterConfig::wide(WideChip::Asc38C1600).validate_wide(),
            Ok(())
        );
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let narrow = AdapterConfig {
            chip_scsi_id: 8,
            ..AdapterConfig::narrow()
        };
        assert!(narrow.validate_narrow().is_err());

        let narrow = AdapterConfig {
            max_host_qng: 4,
            ..AdapterConfig::narrow()
        };
        assert!(narrow.validate_narrow().is_err());

        let wide = AdapterConfig {
            sg_blocks: 0,
            ..AdapterConfig::wide(WideChip::Asc3550)
        };
        assert!(wide.validate_wide().is_err());
    }
}
