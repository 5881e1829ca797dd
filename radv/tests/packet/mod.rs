//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use radv::packet::{
    DecodeError, DnsSearchList, NdOption, Pref64, PrefixInformation,
    RecursiveDnsServer, RouteInformation, RouterAdvertisement,
    RouterPreference, RouterSolicitation,
};

//
// Helper functions.
//

fn test_encode_advert(bytes_expected: &[u8], advert: &RouterAdvertisement) {
    let bytes_actual = advert.encode();
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

//
// Test messages.
//

// RA with no options and default header values.
static ADVERT1: Lazy<(Vec<u8>, RouterAdvertisement)> = Lazy::new(|| {
    (
        vec![
            0x86, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ],
        RouterAdvertisement {
            cur_hop_limit: 0,
            managed: false,
            other: false,
            preference: RouterPreference::Medium,
            router_lifetime: 0,
            reachable_time: 0,
            retrans_timer: 0,
            options: vec![],
        },
    )
});

// Low preference occupies both Prf bits.
static ADVERT2: Lazy<(Vec<u8>, RouterAdvertisement)> = Lazy::new(|| {
    (
        vec![
            0x86, 0x00, 0x00, 0x00, 0x40, 0x18, 0x07, 0x08, 0x00, 0x00,
            0x75, 0x30, 0x00, 0x00, 0x03, 0xe8,
        ],
        RouterAdvertisement {
            cur_hop_limit: 64,
            managed: false,
            other: false,
            preference: RouterPreference::Low,
            router_lifetime: 1800,
            reachable_time: 30000,
            retrans_timer: 1000,
            options: vec![],
        },
    )
});

// Fully loaded RA: MTU, 7-octet source link-layer address (padded to the
// TLV boundary), prefix information, two route information options with
// truncated prefixes, RDNSS, DNSSL with label encoding and padding, and
// a PREF64 with its scaled lifetime.
static ADVERT3: Lazy<(Vec<u8>, RouterAdvertisement)> = Lazy::new(|| {
    (
        vec![
            // Header.
            0x86, 0x00, 0x00, 0x00, 0x0a, 0xc8, 0x00, 0x0a, 0x00, 0x00,
            0x27, 0x10, 0x00, 0x00, 0x27, 0x10,
            // MTU.
            0x05, 0x01, 0x00, 0x00, 0x00, 0x00, 0x05, 0xdc,
            // Source link-layer address.
            0x01, 0x02, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            // Prefix information, fd00::/64.
            0x03, 0x04, 0x40, 0xc0, 0x00, 0x00, 0x00, 0xc8, 0x00, 0x00,
            0x00, 0x64, 0x00, 0x00, 0x00, 0x00, 0xfd, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
            // Route information, 2001:db8::/64 low preference.
            0x18, 0x02, 0x40, 0x18, 0x00, 0x00, 0x00, 0x64, 0x20, 0x01,
            0x0d, 0xb8, 0x00, 0x00, 0x00, 0x00,
            // Route information, 2001:db8:1::/64 high preference.
            0x18, 0x02, 0x40, 0x08, 0x00, 0x00, 0x00, 0xc8, 0x20, 0x01,
            0x0d, 0xb8, 0x00, 0x01, 0x00, 0x00,
            // RDNSS.
            0x19, 0x05, 0x00, 0x00, 0x00, 0x00, 0x01, 0x2c, 0x20, 0x01,
            0x0d, 0xb8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x01, 0x20, 0x01, 0x0d, 0xb8, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02,
            // DNSSL.
            0x1f, 0x05, 0x00, 0x00, 0x00, 0x00, 0x01, 0x90, 0x07, 0x65,
            0x78, 0x61, 0x6d, 0x70, 0x6c, 0x65, 0x03, 0x63, 0x6f, 0x6d,
            0x00, 0x03, 0x66, 0x6f, 0x6f, 0x07, 0x65, 0x78, 0x61, 0x6d,
            0x70, 0x6c, 0x65, 0x03, 0x63, 0x6f, 0x6d, 0x00, 0x00, 0x00,
            // PREF64.
            0x26, 0x02, 0x07, 0x08, 0x00, 0x64, 0xff, 0x9b, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ],
        RouterAdvertisement {
            cur_hop_limit: 10,
            managed: true,
            other: true,
            preference: RouterPreference::High,
            router_lifetime: 10,
            reachable_time: 10000,
            retrans_timer: 10000,
            options: vec![
                NdOption::Mtu(1500),
                NdOption::SourceLinkLayerAddress(
                    [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77].into(),
                ),
                NdOption::PrefixInformation(PrefixInformation {
                    prefix: "fd00::/64".parse().unwrap(),
                    on_link: true,
                    autonomous: true,
                    valid_lifetime: 200,
                    preferred_lifetime: 100,
                }),
                NdOption::RouteInformation(RouteInformation {
                    prefix: "2001:db8::/64".parse().unwrap(),
                    preference: RouterPreference::Low,
                    lifetime: 100,
                }),
                NdOption::RouteInformation(RouteInformation {
                    prefix: "2001:db8:1::/64".parse().unwrap(),
                    preference: RouterPreference::High,
                    lifetime: 200,
                }),
                NdOption::RecursiveDnsServer(RecursiveDnsServer {
                    lifetime: 300,
                    servers: vec![
                        "2001:db8::1".parse().unwrap(),
                        "2001:db8::2".parse().unwrap(),
                    ],
                }),
                NdOption::DnsSearchList(DnsSearchList {
                    lifetime: 400,
                    domains: vec![
                        "example.com".to_owned(),
                        "foo.example.com".to_owned(),
                    ],
                }),
                NdOption::Pref64(Pref64 {
                    prefix: "64:ff9b::/96".parse().unwrap(),
                    lifetime: 1800,
                }),
            ],
        },
    )
});

//
// Tests.
//

#[test]
fn test_encode_advert1() {
    let (ref bytes, ref advert) = *ADVERT1;
    test_encode_advert(bytes, advert);
}

#[test]
fn test_encode_advert2() {
    let (ref bytes, ref advert) = *ADVERT2;
    test_encode_advert(bytes, advert);
}

#[test]
fn test_encode_advert3() {
    let (ref bytes, ref advert) = *ADVERT3;
    test_encode_advert(bytes, advert);
}

#[test]
fn test_encode_pref64_plc() {
    // /32 maps to PLC 5; the 8-second unit shifts away the low bits.
    let advert = RouterAdvertisement {
        cur_hop_limit: 0,
        managed: false,
        other: false,
        preference: RouterPreference::Medium,
        router_lifetime: 0,
        reachable_time: 0,
        retrans_timer: 0,
        options: vec![NdOption::Pref64(Pref64 {
            prefix: "64:ff9b::/32".parse().unwrap(),
            lifetime: 64,
        })],
    };
    let bytes = advert.encode();
    let option = &bytes[16..];
    assert_eq!(option[0], 0x26);
    assert_eq!(option[1], 0x02);
    // (64 / 8) << 3 | 5 = 0x0045.
    assert_eq!(&option[2..4], &[0x00, 0x45]);
}

#[test]
fn test_decode_solicitation() {
    let data = [
        0x85, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x01, 0x02,
        0x00, 0x00, 0x00, 0x00, 0x01,
    ];
    let rs = RouterSolicitation::decode(&data).unwrap();
    assert_eq!(
        rs.source_lladdr,
        Some([0x02, 0x00, 0x00, 0x00, 0x00, 0x01].into())
    );
}

#[test]
fn test_decode_solicitation_no_options() {
    let data = [0x85, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
    let rs = RouterSolicitation::decode(&data).unwrap();
    assert_eq!(rs.source_lladdr, None);
}

#[test]
fn test_decode_solicitation_too_short() {
    let rs = RouterSolicitation::decode(&[0x85, 0x00, 0x00, 0x00]);
    assert_eq!(rs, Err(DecodeError::TooShort(4)));
}

#[test]
fn test_decode_solicitation_wrong_type() {
    let data = [0x86, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
    let rs = RouterSolicitation::decode(&data);
    assert_eq!(rs, Err(DecodeError::InvalidMessageType(0x86)));
}

#[test]
fn test_decode_solicitation_zero_option_length() {
    let data = [
        0x85, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00,
    ];
    let rs = RouterSolicitation::decode(&data);
    assert_eq!(rs, Err(DecodeError::InvalidOptionLength(0)));
}

#[test]
fn test_decode_solicitation_truncated_option() {
    let data = [
        0x85, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02, 0x00,
        0x00,
    ];
    let rs = RouterSolicitation::decode(&data);
    assert_eq!(rs, Err(DecodeError::TooShort(12)));
}
