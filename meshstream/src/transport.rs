//! The datagram seam between streams and the radio.

/// Sends one encoded frame as a single radio datagram.
///
/// The underlying service is best-effort: no fragmentation, no reliability,
/// no hop-by-hop acknowledgements the transport could lean on. Duplicates
/// and reordering across datagrams are expected. Implementations must
/// serialize access to the radio handle; a returned `false` means the radio
/// refused the datagram and the caller may retry later.
///
/// The sender is shared by the stream manager and every stream it owns and
/// must outlive them all.
pub trait DatagramSender: Send + Sync {
    /// Returns whether the radio accepted the datagram.
    fn send_datagram(&self, dest_node_id: u32, data: &[u8]) -> bool;
}
