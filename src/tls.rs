//! TLS leg establishment and peer pinning
//!
//! The outer tunnel of both legs is ordinary TLS. Chain building is not the
//! point here; each peer is validated by comparing the certificate it
//! presents against a pinned copy, the way the original proxy compares the
//! dumped certificate's subject. A mismatch aborts the leg before the
//! interception core ever activates.
use crate::errors::{builder, Error, Result};
use crate::socket::MaybeTlsStream;
use std::io::{BufRead, BufReader, Cursor};
use std::ops::Deref;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::rustls;
use tokio_rustls::rustls::client::danger::{
  HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use tokio_rustls::rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use tokio_rustls::rustls::{DigitallySignedStruct, DistinguishedName, Error as TLSError, SignatureScheme};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// peer certificate
#[derive(Clone, Debug)]
pub struct PeerCertificate {
  pub(crate) inner: Vec<u8>,
}

impl Deref for PeerCertificate {
  type Target = Vec<u8>;

  fn deref(&self) -> &Self::Target {
    &self.inner
  }
}

/// A DER encoded X509 certificate used for peer pinning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
  der: Vec<u8>,
}

impl Certificate {
  /// Create a `Certificate` from a binary DER encoded certificate.
  pub fn from_der(der: &[u8]) -> Certificate {
    Certificate {
      der: der.to_owned(),
    }
  }

  /// Create a `Certificate` from the first certificate in a PEM bundle.
  pub fn from_pem(pem: &[u8]) -> Result<Certificate> {
    let mut reader = BufReader::new(Cursor::new(pem));
    Self::read_pem_certs(&mut reader)?
      .into_iter()
      .next()
      .map(|der| Certificate { der })
      .ok_or_else(|| builder("no certificate found in PEM input"))
  }

  /// The DER bytes of this certificate.
  pub fn der(&self) -> &[u8] {
    &self.der
  }

  fn read_pem_certs(reader: &mut impl BufRead) -> Result<Vec<Vec<u8>>> {
    rustls_pemfile::certs(reader)
      .map(|result| match result {
        Ok(cert) => Ok(cert.as_ref().to_vec()),
        Err(_) => Err(builder("invalid certificate encoding")),
      })
      .collect()
  }
}

/// Represents a private key and X509 cert chain as one TLS identity.
pub struct Identity {
  key: PrivateKeyDer<'static>,
  certs: Vec<CertificateDer<'static>>,
}

impl Clone for Identity {
  fn clone(&self) -> Self {
    Identity {
      key: self.key.clone_key(),
      certs: self.certs.clone(),
    }
  }
}

impl Identity {
  /// Parses a PEM encoded private key and certificate chain.
  ///
  /// The input should contain a PEM encoded private key and at least one PEM
  /// encoded certificate. The key must be in RSA, SEC1 Elliptic Curve or
  /// PKCS#8 format.
  pub fn from_pem(buf: &[u8]) -> Result<Identity> {
    use rustls_pemfile::Item;

    let mut pem = Cursor::new(buf);
    let mut keys = Vec::<PrivateKeyDer>::new();
    let mut certs = Vec::<CertificateDer>::new();

    for result in rustls_pemfile::read_all(&mut pem) {
      match result {
        Ok(Item::X509Certificate(cert)) => certs.push(cert),
        Ok(Item::Pkcs1Key(key)) => keys.push(key.into()),
        Ok(Item::Pkcs8Key(key)) => keys.push(key.into()),
        Ok(Item::Sec1Key(key)) => keys.push(key.into()),
        Ok(_) => {
          return Err(builder(TLSError::General(String::from(
            "No valid certificate was found",
          ))))
        }
        Err(_) => {
          return Err(builder(TLSError::General(String::from(
            "Invalid identity PEM file",
          ))))
        }
      }
    }

    if let (Some(key), false) = (keys.pop(), certs.is_empty()) {
      Ok(Identity { key, certs })
    } else {
      Err(builder(TLSError::General(String::from(
        "private key or certificate not found",
      ))))
    }
  }
}

/// Certificate material for both legs of one interception point.
#[derive(Clone)]
pub struct TlsLegs {
  /// identity presented to the connecting client (the proxy's self-signed
  /// server certificate)
  pub serving_identity: Identity,
  /// identity presented to the real server (the dumped client certificate)
  pub client_identity: Identity,
  /// certificate the real client is expected to present
  pub pinned_client_certificate: Certificate,
  /// certificate the real server is expected to present
  pub pinned_server_certificate: Certificate,
  /// SNI host name used toward the real server
  pub target_host: String,
}

impl TlsLegs {
  /// Accept the client leg: TLS server handshake requiring a client
  /// certificate, then pin validation.
  pub async fn accept_client(&self, stream: TcpStream) -> Result<MaybeTlsStream> {
    let config = rustls::ServerConfig::builder()
      .with_client_cert_verifier(Arc::new(RequireAnyClientCert))
      .with_single_cert(self.serving_identity.certs.clone(), self.serving_identity.key.clone_key())?;
    let acceptor = TlsAcceptor::from(Arc::new(config));
    let tls = acceptor.accept(stream).await?;
    let socket = MaybeTlsStream::Tls(Box::new(tls.into()));
    verify_pinned(&socket, &self.pinned_client_certificate, "client")?;
    tracing::info!("client certificate is valid");
    Ok(socket)
  }

  /// Connect the server leg: TCP + TLS client handshake presenting the
  /// dumped client certificate, then pin validation.
  pub async fn connect_to_target(&self, addr: &str) -> Result<MaybeTlsStream> {
    tracing::info!(addr, "connecting to target server");
    let stream = TcpStream::connect(addr).await?;
    let config = rustls::ClientConfig::builder()
      .dangerous()
      .with_custom_certificate_verifier(Arc::new(PinnedServerCert))
      .with_client_auth_cert(
        self.client_identity.certs.clone(),
        self.client_identity.key.clone_key(),
      )?;
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(self.target_host.clone()).map_err(builder)?;
    let tls = connector.connect(server_name, stream).await?;
    let socket = MaybeTlsStream::Tls(Box::new(tls.into()));
    verify_pinned(&socket, &self.pinned_server_certificate, "server")?;
    tracing::info!("server certificate is valid");
    Ok(socket)
  }
}

fn verify_pinned(socket: &MaybeTlsStream, expected: &Certificate, peer: &str) -> Result<()> {
  match socket.peer_certificate() {
    Some(cert) if cert.as_slice() == expected.der() => Ok(()),
    Some(_) => Err(Error::PeerAuthenticationFailure(format!(
      "{peer} certificate does not match the pinned certificate"
    ))),
    None => Err(Error::PeerAuthenticationFailure(format!(
      "{peer} presented no certificate"
    ))),
  }
}

const SCHEMES: [SignatureScheme; 13] = [
  SignatureScheme::RSA_PKCS1_SHA1,
  SignatureScheme::ECDSA_SHA1_Legacy,
  SignatureScheme::RSA_PKCS1_SHA256,
  SignatureScheme::ECDSA_NISTP256_SHA256,
  SignatureScheme::RSA_PKCS1_SHA384,
  SignatureScheme::ECDSA_NISTP384_SHA384,
  SignatureScheme::RSA_PKCS1_SHA512,
  SignatureScheme::ECDSA_NISTP521_SHA512,
  SignatureScheme::RSA_PSS_SHA256,
  SignatureScheme::RSA_PSS_SHA384,
  SignatureScheme::RSA_PSS_SHA512,
  SignatureScheme::ED25519,
  SignatureScheme::ED448,
];

// Chain validation is replaced by the post-handshake pin comparison; the
// verifiers only require that a certificate is presented at all.
#[derive(Debug)]
struct PinnedServerCert;

impl ServerCertVerifier for PinnedServerCert {
  fn verify_server_cert(
    &self,
    _end_entity: &CertificateDer,
    _intermediates: &[CertificateDer],
    _server_name: &ServerName,
    _ocsp_response: &[u8],
    _now: UnixTime,
  ) -> std::result::Result<ServerCertVerified, TLSError> {
    Ok(ServerCertVerified::assertion())
  }

  fn verify_tls12_signature(
    &self,
    _message: &[u8],
    _cert: &CertificateDer,
    _dss: &DigitallySignedStruct,
  ) -> std::result::Result<HandshakeSignatureValid, TLSError> {
    Ok(HandshakeSignatureValid::assertion())
  }

  fn verify_tls13_signature(
    &self,
    _message: &[u8],
    _cert: &CertificateDer,
    _dss: &DigitallySignedStruct,
  ) -> std::result::Result<HandshakeSignatureValid, TLSError> {
    Ok(HandshakeSignatureValid::assertion())
  }

  fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
    SCHEMES.to_vec()
  }
}

#[derive(Debug)]
struct RequireAnyClientCert;

impl ClientCertVerifier for RequireAnyClientCert {
  fn root_hint_subjects(&self) -> &[DistinguishedName] {
    &[]
  }

  fn verify_client_cert(
    &self,
    _end_entity: &CertificateDer,
    _intermediates: &[CertificateDer],
    _now: UnixTime,
  ) -> std::result::Result<ClientCertVerified, TLSError> {
    Ok(ClientCertVerified::assertion())
  }

  fn verify_tls12_signature(
    &self,
    _message: &[u8],
    _cert: &CertificateDer,
    _dss: &DigitallySignedStruct,
  ) -> std::result::Result<HandshakeSignatureValid, TLSError> {
    Ok(HandshakeSignatureValid::assertion())
  }

  fn verify_tls13_signature(
    &self,
    _message: &[u8],
    _cert: &CertificateDer,
    _dss: &DigitallySignedStruct,
  ) -> std::result::Result<HandshakeSignatureValid, TLSError> {
    Ok(HandshakeSignatureValid::assertion())
  }

  fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
    SCHEMES.to_vec()
  }
}
