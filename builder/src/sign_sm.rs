// Licensed under the Apache-2.0 license

use smlang::statemachine;

// Any failing action is followed by `Abort`, after which no step is accepted.
statemachine! {
    derive_states: [Clone, Copy, Debug],
    derive_events: [Clone, Debug],
    transitions: {
        *Unsigned + CheckHeader / on_check_header = HeaderChecked,

        HeaderChecked + EmbedKeys [has_signer] / on_embed_keys = KeyEmbedded,

        HeaderChecked + ChecksumForSigning / on_checksum_for_signing = ChecksummedForSigning,
        KeyEmbedded + ChecksumForSigning / on_checksum_for_signing = ChecksummedForSigning,

        ChecksummedForSigning + Sign(Vec<u8>) / on_sign = Signed,

        ChecksummedForSigning + Finalize / on_finalize = Finalized,
        Signed + Finalize / on_finalize = Finalized,

        _ + Abort = Failed
    }
}
