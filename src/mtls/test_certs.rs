//! Certificate fixtures for unit tests, generated with `rcgen`.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, Ia5String, IsCa, KeyPair, KeyUsagePurpose, SanType,
};

/// A self-signed test CA able to issue leaf certificates.
pub struct TestCa {
    pub cert: Certificate,
    pub key: KeyPair,
}

/// A leaf certificate and its key, both PEM-encoded.
pub struct TestLeaf {
    pub cert_pem: String,
    pub key_pem: String,
    pub der: Vec<u8>,
}

impl TestLeaf {
    /// Certificate followed by key, the combined layout the broker loads.
    pub fn combined_pem(&self) -> String {
        format!("{}{}", self.cert_pem, self.key_pem)
    }
}

impl TestCa {
    pub fn new(cn: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    pub fn cert_pem(&self) -> String {
        self.cert.pem()
    }

    /// Issue a client certificate with the given CN and DNS SANs.
    pub fn client(&self, cn: &str, dns: &[&str]) -> TestLeaf {
        self.leaf(cn, dns, &[], ExtendedKeyUsagePurpose::ClientAuth)
    }

    /// Issue a server certificate for `localhost` / `127.0.0.1`.
    pub fn server(&self) -> TestLeaf {
        self.leaf(
            "localhost",
            &["localhost"],
            &["127.0.0.1".parse().unwrap()],
            ExtendedKeyUsagePurpose::ServerAuth,
        )
    }

    pub fn leaf(
        &self,
        cn: &str,
        dns: &[&str],
        ips: &[IpAddr],
        usage: ExtendedKeyUsagePurpose,
    ) -> TestLeaf {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        let mut sans: Vec<SanType> = dns
            .iter()
            .map(|d| SanType::DnsName(Ia5String::try_from(*d).unwrap()))
            .collect();
        sans.extend(ips.iter().map(|ip| SanType::IpAddress(*ip)));
        params.subject_alt_names = sans;
        params.extended_key_usages = vec![usage];
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        TestLeaf {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            der: cert.der().to_vec(),
        }
    }
}

/// Write `contents` to `dir/name` and return the path.
pub fn write_pem(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
